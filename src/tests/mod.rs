use super::*;
use crate::channel::{RunLabel, Signal, SignalBus, Subscription};
use crate::context::SurfaceOptions;
use crate::page::Page;
use crate::sequencer::InjectedTest;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

mod capability_bindings;
mod css_and_selectors;
mod dom_and_events;
mod harness_config;
mod script_language;
mod signal_routing;

fn io_error(err: std::io::Error) -> Error {
    Error::Context(err.to_string())
}

/// A loaded page plus the receiving end of its signal route.
struct TestPage {
    page: Page,
    signals: Subscription,
    load_signals: Vec<Signal>,
    next_index: usize,
    _dir: tempfile::TempDir,
}

impl TestPage {
    fn from_html(html: &str) -> Result<Self> {
        Self::from_files(&[("index.html", html)])
    }

    /// Writes `files` into a fresh directory and loads the first one.
    fn from_files(files: &[(&str, &str)]) -> Result<Self> {
        Self::with_options(files, SurfaceOptions::default())
    }

    fn with_options(files: &[(&str, &str)], options: SurfaceOptions) -> Result<Self> {
        let dir = tempfile::tempdir().map_err(io_error)?;
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
            std::fs::write(path, contents).map_err(io_error)?;
        }
        let entry = files
            .first()
            .map(|(name, _)| dir.path().join(name))
            .ok_or_else(|| Error::Config("no files".into()))?;

        let bus = SignalBus::new();
        let label = RunLabel::generate("index.html");
        let signals = bus.subscribe(label.clone())?;
        let abort = Arc::new(AtomicBool::new(false));
        let mut page = Page::open(&entry, options, bus.sender(label), abort)?;
        page.finish_parsing();
        page.finish_loading();

        let mut test_page = Self {
            page,
            signals,
            load_signals: Vec::new(),
            next_index: 0,
            _dir: dir,
        };
        test_page.load_signals = test_page.drain();
        Ok(test_page)
    }

    fn drain(&mut self) -> Vec<Signal> {
        let mut out = Vec::new();
        while let Some(signal) = self.signals.try_recv() {
            out.push(signal);
        }
        out
    }

    /// Runs one test script and returns every signal it produced.
    fn run(&mut self, source: &str) -> Vec<Signal> {
        self.drain();
        let test = InjectedTest {
            index: self.next_index,
            source: source.to_string(),
        };
        self.next_index += 1;
        self.page.run_test(&test);
        self.drain()
    }

    /// Evaluates `expr` in a test and returns its string conversion.
    fn eval(&mut self, expr: &str) -> Result<String> {
        let signals = self.run(&format!("debug(String({expr}));\npass();"));
        match signals.as_slice() {
            [Signal::Debug(value), Signal::Pass] => Ok(value.clone()),
            other => Err(Error::ScriptRuntime(format!("`{expr}` produced {other:?}"))),
        }
    }

    fn assert_eval(&mut self, expr: &str, expected: &str) -> Result<()> {
        let actual = self.eval(expr)?;
        assert_eq!(actual, expected, "evaluating `{expr}`");
        Ok(())
    }
}

fn blank() -> Result<TestPage> {
    TestPage::from_html("<!doctype html><html><head><title>t</title></head><body></body></html>")
}
