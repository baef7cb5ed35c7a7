use super::*;
use crate::context::{LifecycleEvent, ReadinessLatch};
use crate::harness::Outcome;
use crate::sequencer::{ScriptTarget, SequencerStep, TestSequencer};
use proptest::prelude::*;
use std::collections::HashSet as Set;

#[derive(Default)]
struct RecordingTarget {
    injected: RefCell<Vec<InjectedTest>>,
}

impl ScriptTarget for RecordingTarget {
    fn inject(&self, test: InjectedTest) -> Result<()> {
        self.injected.borrow_mut().push(test);
        Ok(())
    }
}

impl RecordingTarget {
    fn sources(&self) -> Vec<String> {
        self.injected.borrow().iter().map(|test| test.source.clone()).collect()
    }
}

#[test]
fn run_labels_are_unique_and_slugged() {
    let labels = (0..200)
        .map(|_| RunLabel::generate("pages/About Us.html"))
        .collect::<Vec<_>>();
    let distinct = labels.iter().map(RunLabel::as_str).collect::<Set<_>>();
    assert_eq!(distinct.len(), labels.len());
    assert!(labels[0].as_str().starts_with("pages-about-us-html-"));
    assert_eq!(RunLabel::generate("///").as_str().split('-').next(), Some("page"));
}

#[test]
fn bus_routes_signals_only_to_the_matching_label() -> Result<()> {
    let bus = SignalBus::new();
    let a = RunLabel::generate("a.html");
    let b = RunLabel::generate("b.html");
    let mut sub_a = bus.subscribe(a.clone())?;
    let mut sub_b = bus.subscribe(b.clone())?;

    assert!(bus.sender(a).send(Signal::Pass));
    assert!(bus.sender(b).send(Signal::Debug("hello".into())));

    assert_eq!(sub_a.try_recv(), Some(Signal::Pass));
    assert_eq!(sub_a.try_recv(), None);
    assert_eq!(sub_b.try_recv(), Some(Signal::Debug("hello".into())));
    Ok(())
}

#[test]
fn signals_for_one_label_arrive_in_send_order() -> Result<()> {
    let bus = SignalBus::new();
    let label = RunLabel::generate("order.html");
    let mut sub = bus.subscribe(label.clone())?;
    let sender = bus.sender(label);
    for i in 0..10 {
        sender.send(Signal::Debug(i.to_string()));
    }
    sender.send(Signal::Pass);
    let received = std::iter::from_fn(|| sub.try_recv()).collect::<Vec<_>>();
    let mut expected = (0..10).map(|i| Signal::Debug(i.to_string())).collect::<Vec<_>>();
    expected.push(Signal::Pass);
    assert_eq!(received, expected);
    Ok(())
}

#[test]
fn duplicate_subscription_is_rejected() -> Result<()> {
    let bus = SignalBus::new();
    let label = RunLabel::generate("dup.html");
    let _first = bus.subscribe(label.clone())?;
    match bus.subscribe(label) {
        Err(Error::Channel(message)) => assert!(message.contains("already subscribed")),
        other => panic!("expected a channel error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn dropping_a_subscription_deregisters_its_label() -> Result<()> {
    let bus = SignalBus::new();
    let label = RunLabel::generate("stale.html");
    let sender = bus.sender(label.clone());
    {
        let _sub = bus.subscribe(label.clone())?;
        assert!(bus.is_subscribed(&label));
        assert_eq!(bus.active_labels(), vec![label.clone()]);
    }
    assert!(!bus.is_subscribed(&label));
    assert!(!sender.send(Signal::Pass));
    // The label can be reused once its previous run is gone.
    let _again = bus.subscribe(label)?;
    Ok(())
}

#[test]
fn only_pass_and_fail_are_control_signals() {
    assert!(Signal::Pass.is_control());
    assert!(Signal::Fail(String::new()).is_control());
    assert!(!Signal::Debug("note".into()).is_control());
}

#[test]
fn sequencer_advances_only_on_pass() -> Result<()> {
    let target = RecordingTarget::default();
    let mut seq = TestSequencer::new(["one", "two", "three"]);
    assert_eq!((seq.remaining(), seq.in_flight()), (3, None));
    assert_eq!(seq.dispatch_next(&target)?, SequencerStep::Dispatched(0));
    assert_eq!((seq.remaining(), seq.in_flight()), (2, Some(0)));
    assert_eq!(seq.on_signal(&Signal::Debug("noise".into()), &target)?, SequencerStep::Continue);
    assert_eq!(seq.in_flight(), Some(0));
    assert_eq!(seq.on_signal(&Signal::Pass, &target)?, SequencerStep::Dispatched(1));
    assert_eq!((seq.remaining(), seq.in_flight()), (1, Some(1)));
    assert_eq!(seq.on_signal(&Signal::Pass, &target)?, SequencerStep::Dispatched(2));
    assert_eq!(
        seq.on_signal(&Signal::Pass, &target)?,
        SequencerStep::Finished(Outcome::Success)
    );
    assert_eq!(target.sources(), vec!["one", "two", "three"]);
    assert_eq!(seq.dispatched(), 3);
    assert!(seq.is_finished());
    Ok(())
}

#[test]
fn sequencer_fails_fast_and_discards_the_rest() -> Result<()> {
    let target = RecordingTarget::default();
    let mut seq = TestSequencer::new(["one", "two", "three"]);
    seq.dispatch_next(&target)?;
    seq.on_signal(&Signal::Pass, &target)?;
    assert_eq!(
        seq.on_signal(&Signal::Fail("Wrong title".into()), &target)?,
        SequencerStep::Finished(Outcome::Failure("Wrong title".into()))
    );
    assert_eq!(seq.remaining(), 0);
    assert_eq!(seq.on_signal(&Signal::Pass, &target)?, SequencerStep::Continue);
    assert_eq!(target.sources(), vec!["one", "two"]);
    Ok(())
}

#[test]
fn sequencer_with_no_tests_succeeds_on_first_dispatch() -> Result<()> {
    let target = RecordingTarget::default();
    let mut seq = TestSequencer::new(Vec::<String>::new());
    assert_eq!(seq.dispatch_next(&target)?, SequencerStep::Finished(Outcome::Success));
    assert!(target.sources().is_empty());
    Ok(())
}

#[test]
fn sequencer_refuses_a_second_in_flight_test() -> Result<()> {
    let target = RecordingTarget::default();
    let mut seq = TestSequencer::new(["one", "two"]);
    seq.dispatch_next(&target)?;
    assert!(matches!(seq.dispatch_next(&target), Err(Error::Context(_))));
    assert_eq!(seq.in_flight(), Some(0));
    Ok(())
}

#[test]
fn sequencer_abort_yields_an_outcome_once() {
    let mut seq = TestSequencer::new(["one"]);
    assert_eq!(
        seq.abort(Outcome::Failure("timeout".into())),
        Some(Outcome::Failure("timeout".into()))
    );
    assert_eq!(seq.abort(Outcome::Success), None);
}

#[test]
fn readiness_latch_waits_for_both_events() {
    let mut latch = ReadinessLatch::new();
    assert!(!latch.observe(&LifecycleEvent::ContentLoaded));
    assert!(!latch.observe(&LifecycleEvent::ContentLoaded));
    assert!(!latch.is_ready());
    assert!(latch.observe(&LifecycleEvent::DomReady));
    assert!(latch.has_fired());
    assert!(!latch.observe(&LifecycleEvent::DomReady));
}

fn lifecycle_event() -> impl Strategy<Value = LifecycleEvent> {
    prop_oneof![
        Just(LifecycleEvent::DomReady),
        Just(LifecycleEvent::ContentLoaded),
        "[a-z]{1,8}".prop_map(LifecycleEvent::LoadFailed),
    ]
}

#[derive(Debug, Clone)]
enum Reply {
    Pass,
    Fail,
    Debug,
}

fn reply() -> impl Strategy<Value = Reply> {
    prop_oneof![
        6 => Just(Reply::Pass),
        1 => Just(Reply::Fail),
        2 => Just(Reply::Debug),
    ]
}

proptest! {
    #[test]
    fn latch_fires_exactly_once_for_any_interleaving(
        events in proptest::collection::vec(lifecycle_event(), 0..24)
    ) {
        let mut latch = ReadinessLatch::new();
        let mut fired_at = Vec::new();
        let mut seen_dom = false;
        let mut seen_load = false;
        for (i, event) in events.iter().enumerate() {
            match event {
                LifecycleEvent::DomReady => seen_dom = true,
                LifecycleEvent::ContentLoaded => seen_load = true,
                LifecycleEvent::LoadFailed(_) => {}
            }
            if latch.observe(event) {
                prop_assert!(seen_dom && seen_load);
                fired_at.push(i);
            }
        }
        prop_assert_eq!(fired_at.len(), usize::from(seen_dom && seen_load));
    }

    #[test]
    fn sequencer_dispatches_in_order_and_never_more_than_once(
        count in 0usize..8,
        replies in proptest::collection::vec(reply(), 0..32)
    ) {
        let target = RecordingTarget::default();
        let tests = (0..count).map(|i| format!("test {i}")).collect::<Vec<_>>();
        let mut seq = TestSequencer::new(tests.clone());
        let mut outcome = match seq.dispatch_next(&target) {
            Ok(SequencerStep::Finished(outcome)) => Some(outcome),
            Ok(_) => None,
            Err(err) => return Err(TestCaseError::fail(err.to_string())),
        };
        let mut finished_count = usize::from(outcome.is_some());
        for reply in replies {
            let signal = match reply {
                Reply::Pass => Signal::Pass,
                Reply::Fail => Signal::Fail("no".into()),
                Reply::Debug => Signal::Debug("d".into()),
            };
            match seq.on_signal(&signal, &target) {
                Ok(SequencerStep::Finished(result)) => {
                    finished_count += 1;
                    outcome = Some(result);
                }
                Ok(_) => {}
                Err(err) => return Err(TestCaseError::fail(err.to_string())),
            }
        }
        prop_assert!(finished_count <= 1);
        let sources = target.sources();
        prop_assert!(sources.len() <= count);
        prop_assert_eq!(&sources[..], &tests[..sources.len()]);
        if outcome == Some(Outcome::Success) {
            prop_assert_eq!(sources.len(), count);
        }
    }
}
