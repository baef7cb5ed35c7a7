//! Serial dispatch of one file's test scripts.

use super::*;
use crate::channel::Signal;
use crate::harness::Outcome;

/// A test script ready for injection, tagged with its position in the file's
/// test list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedTest {
    pub index: usize,
    pub source: String,
}

/// Something a test can be injected into.
pub trait ScriptTarget {
    fn inject(&self, test: InjectedTest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerStep {
    /// The test at this index is now in flight.
    Dispatched(usize),
    /// Nothing changed; keep waiting for signals.
    Continue,
    Finished(Outcome),
}

/// Owns the remaining test queue for one run. At most one test is in flight
/// and the queue only shrinks from the front.
#[derive(Debug)]
pub struct TestSequencer {
    queue: VecDeque<String>,
    dispatched: usize,
    in_flight: Option<usize>,
    finished: bool,
}

impl TestSequencer {
    pub fn new<I, S>(tests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: tests.into_iter().map(Into::into).collect(),
            dispatched: 0,
            in_flight: None,
            finished: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn in_flight(&self) -> Option<usize> {
        self.in_flight
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Pops the head of the queue and injects it. An empty queue finishes the
    /// run with `Success`.
    pub fn dispatch_next(&mut self, target: &impl ScriptTarget) -> Result<SequencerStep> {
        if self.finished {
            return Ok(SequencerStep::Continue);
        }
        if let Some(index) = self.in_flight {
            return Err(Error::Context(format!(
                "test {index} is still in flight; refusing to dispatch another"
            )));
        }
        let Some(source) = self.queue.pop_front() else {
            return Ok(self.finish(Outcome::Success));
        };
        let index = self.dispatched;
        self.dispatched += 1;
        self.in_flight = Some(index);
        tracing::debug!(test = index, remaining = self.queue.len(), "dispatching test");
        target.inject(InjectedTest { index, source })?;
        Ok(SequencerStep::Dispatched(index))
    }

    /// Advances on `pass`, fails fast on `fail` and ignores `debug`.
    pub fn on_signal(
        &mut self,
        signal: &Signal,
        target: &impl ScriptTarget,
    ) -> Result<SequencerStep> {
        if self.finished {
            tracing::warn!(?signal, "ignoring signal after the run finished");
            return Ok(SequencerStep::Continue);
        }
        match signal {
            Signal::Debug(_) => Ok(SequencerStep::Continue),
            Signal::Pass => {
                if self.in_flight.take().is_none() {
                    tracing::warn!("ignoring pass with no test in flight");
                    return Ok(SequencerStep::Continue);
                }
                self.dispatch_next(target)
            }
            Signal::Fail(reason) => {
                self.in_flight = None;
                let discarded = self.queue.len();
                self.queue.clear();
                if discarded > 0 {
                    tracing::debug!(discarded, "discarding remaining tests after failure");
                }
                Ok(self.finish(Outcome::Failure(reason.clone())))
            }
        }
    }

    /// Ends the run with an outcome decided outside the signal flow (timeouts,
    /// cancellation). Returns `None` if an outcome was already produced.
    pub fn abort(&mut self, outcome: Outcome) -> Option<Outcome> {
        if self.finished {
            return None;
        }
        self.queue.clear();
        self.in_flight = None;
        match self.finish(outcome) {
            SequencerStep::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    fn finish(&mut self, outcome: Outcome) -> SequencerStep {
        self.finished = true;
        SequencerStep::Finished(outcome)
    }
}
