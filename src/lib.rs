//! Behavioral test harness for static web pages.
//!
//! A [`FunctionalityHarness`] loads one page per [`FileCheck`] into an isolated
//! execution context, injects the check's test scripts one at a time and
//! listens for the `pass` / `fail` / `debug` signals they emit. Each run ends
//! with exactly one [`Outcome`].
//!
//! ```no_run
//! use page_functionality::{FileCheck, FunctionalityHarness, HarnessConfig, Outcome};
//!
//! # async fn demo() {
//! let harness = FunctionalityHarness::new(HarnessConfig::with_root("student-site"));
//! let check = FileCheck::new(
//!     "index.html",
//!     ["if (document.title === 'Hi') { pass(); } else { fail('Wrong title'); }"],
//! );
//! match harness.run("functionality", check).await {
//!     Outcome::Success => println!("ok"),
//!     Outcome::Failure(reason) => println!("failed: {reason}"),
//! }
//! # }
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

mod channel;
mod config;
mod context;
mod css;
mod dom;
mod harness;
mod html;
mod js_regex;
mod page;
mod script;
mod selector;
mod sequencer;

pub use channel::{RunLabel, Signal, SignalBus, SignalSender, Subscription};
pub use config::{HarnessConfig, Viewport};
pub use context::{ContextHandle, ContextManager, LifecycleEvent, ReadinessLatch, SurfaceOptions};
pub use harness::{
    DiscardProgress, FileCheck, FunctionalityHarness, Outcome, ProgressEvent, ProgressSink,
};
pub use sequencer::{InjectedTest, ScriptTarget, SequencerStep, TestSequencer};

pub(crate) use dom::{Dom, NodeId, NodeType};
pub(crate) use selector::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("html parse error: {0}")]
    HtmlParse(String),
    #[error("script parse error: {0}")]
    ScriptParse(String),
    #[error("script runtime error: {0}")]
    ScriptRuntime(String),
    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("execution context error: {0}")]
    Context(String),
    #[error("message channel error: {0}")]
    Channel(String),
    #[error("config error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests;
