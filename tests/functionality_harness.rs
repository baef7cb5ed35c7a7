use page_functionality::{
    ContextManager, FileCheck, FunctionalityHarness, HarnessConfig, Outcome, ProgressEvent,
    RunLabel, Signal, SignalBus, SurfaceOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const GENERIC_REASON: &str = "Double check the Javascript";

fn project(files: &[(&str, &str)]) -> (TempDir, HarnessConfig) {
    let dir = tempfile::tempdir().expect("create temp dir");
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(path, contents).expect("write fixture");
    }
    let mut config = HarnessConfig::with_root(dir.path());
    config.settle_delay_ms = 10;
    (dir, config)
}

fn titled(title: &str) -> String {
    format!("<!doctype html><html><head><title>{title}</title></head><body><h1>{title}</h1></body></html>")
}

type Events = Arc<Mutex<Vec<ProgressEvent>>>;

fn recording(config: HarnessConfig) -> (FunctionalityHarness, Events) {
    let events: Events = Arc::default();
    let sink = Arc::clone(&events);
    let harness = FunctionalityHarness::new(config)
        .with_progress(move |event: ProgressEvent| sink.lock().push(event));
    (harness, events)
}

fn completed_errors(events: &Events) -> Vec<String> {
    events
        .lock()
        .iter()
        .find_map(|event| match event {
            ProgressEvent::Completed { errors, .. } => Some(errors.clone()),
            _ => None,
        })
        .expect("a completed event")
}

fn debug_messages(events: &Events) -> Vec<String> {
    events
        .lock()
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Debug { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn assert_torn_down(harness: &FunctionalityHarness) {
    assert_eq!(harness.contexts().live_contexts(), 0);
    assert!(harness.bus().active_labels().is_empty());
}

#[tokio::test]
async fn missing_file_fails_without_creating_a_context() {
    let (_dir, config) = project(&[]);
    let (harness, events) = recording(config);

    let outcome = harness
        .run("functionality", FileCheck::new("nope.html", ["pass();"]))
        .await;

    let message = "The file “nope.html” is missing or misspelled".to_string();
    assert_eq!(outcome, Outcome::Failure(message.clone()));
    assert_eq!(harness.contexts().created_contexts(), 0);
    assert_eq!(
        *events.lock(),
        vec![
            ProgressEvent::Started {
                group: "functionality".into(),
                check: "nope.html".into(),
                label: "nope.html".into(),
            },
            ProgressEvent::Completed {
                group: "functionality".into(),
                check: "nope.html".into(),
                label: "nope.html".into(),
                errors: vec![message],
            },
        ]
    );
}

#[tokio::test]
async fn passing_tests_succeed_and_report_progress_in_order() {
    let (_dir, config) = project(&[("index.html", &titled("Hi"))]);
    let (harness, events) = recording(config);

    let outcome = harness
        .run(
            "functionality",
            FileCheck::new("index.html", ["pass();", "debug('two'); pass();", "pass();"]),
        )
        .await;

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(harness.contexts().created_contexts(), 1);
    assert_torn_down(&harness);
    let kinds = events
        .lock()
        .iter()
        .map(|event| match event {
            ProgressEvent::GroupStarted { .. } => "group",
            ProgressEvent::Started { .. } => "started",
            ProgressEvent::Computing { .. } => "computing",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Debug { .. } => "debug",
        })
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec!["started", "computing", "debug", "completed"]);
    assert!(completed_errors(&events).is_empty());
}

#[tokio::test]
async fn title_check_passes_for_hi_and_fails_for_bye() {
    let tests = [
        "pass();",
        "if (document.title === 'Hi') { pass(); } else { fail('Wrong title'); }",
    ];

    let (_hi_dir, hi_config) = project(&[("index.html", &titled("Hi"))]);
    let hi = FunctionalityHarness::new(hi_config);
    assert_eq!(
        hi.run("functionality", FileCheck::new("index.html", tests)).await,
        Outcome::Success
    );

    let (_bye_dir, bye_config) = project(&[("index.html", &titled("Bye"))]);
    let (bye, events) = recording(bye_config);
    assert_eq!(
        bye.run("functionality", FileCheck::new("index.html", tests)).await,
        Outcome::Failure("Wrong title".into())
    );
    assert_eq!(
        completed_errors(&events),
        vec!["The website isn’t functioning as expected: Wrong title".to_string()]
    );
}

#[tokio::test]
async fn failure_stops_the_remaining_tests() {
    let (_dir, config) = project(&[("index.html", &titled("Hi"))]);
    let (harness, events) = recording(config);

    let outcome = harness
        .run(
            "functionality",
            FileCheck::new(
                "index.html",
                [
                    "debug('first ran'); pass();",
                    "fail('stop here');",
                    "debug('third ran'); pass();",
                ],
            ),
        )
        .await;

    assert_eq!(outcome, Outcome::Failure("stop here".into()));
    assert_eq!(debug_messages(&events), vec!["first ran".to_string()]);
    assert_torn_down(&harness);
}

#[tokio::test]
async fn uncaught_error_is_debugged_then_fails_generically() {
    let (_dir, config) = project(&[("index.html", &titled("Hi"))]);
    let (harness, events) = recording(config);

    let outcome = harness
        .run("functionality", FileCheck::new("index.html", ["throw new Error('boom');"]))
        .await;

    assert_eq!(outcome, Outcome::Failure(GENERIC_REASON.into()));
    let recorded = events.lock().clone();
    let debug_at = recorded
        .iter()
        .position(|event| {
            matches!(event, ProgressEvent::Debug { message, .. } if message.contains("boom"))
        })
        .expect("debug event carrying the error message");
    let completed_at = recorded
        .iter()
        .position(|event| matches!(event, ProgressEvent::Completed { .. }))
        .expect("completed event");
    assert!(debug_at < completed_at);
}

#[tokio::test]
async fn empty_test_list_succeeds_once_the_page_loads() {
    let (_dir, config) = project(&[("index.html", &titled("Hi"))]);
    let harness = FunctionalityHarness::new(config);

    let outcome = harness
        .run("functionality", FileCheck::new("index.html", Vec::<String>::new()))
        .await;

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(harness.contexts().created_contexts(), 1);
    assert_torn_down(&harness);
}

#[tokio::test]
async fn silent_test_times_out() {
    let (_dir, mut config) = project(&[("index.html", &titled("Hi"))]);
    config.test_timeout_ms = Some(150);
    let harness = FunctionalityHarness::new(config);

    let outcome = harness
        .run("functionality", FileCheck::new("index.html", ["debug('thinking');"]))
        .await;

    assert_eq!(
        outcome,
        Outcome::Failure("The functionality test did not finish within 150 ms".into())
    );
    assert_torn_down(&harness);
}

#[tokio::test]
async fn infinite_loop_fails_through_the_step_budget() {
    let (_dir, mut config) = project(&[("index.html", &titled("Hi"))]);
    config.script_step_limit = 50_000;
    let harness = FunctionalityHarness::new(config);

    let outcome = harness
        .run("functionality", FileCheck::new("index.html", ["for (;;) {}"]))
        .await;

    assert_eq!(outcome, Outcome::Failure(GENERIC_REASON.into()));
}

#[tokio::test]
async fn cancellation_tears_the_run_down() {
    let (_dir, mut config) = project(&[("index.html", &titled("Hi"))]);
    config.test_timeout_ms = None;
    let harness = FunctionalityHarness::new(config);
    let token = CancellationToken::new();

    let canceller = token.clone();
    let cancel_later = async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    };
    let (outcome, ()) = tokio::join!(
        harness.run_with_cancellation(
            "functionality",
            FileCheck::new("index.html", ["debug('never settles');"]),
            token,
        ),
        cancel_later,
    );

    assert_eq!(outcome, Outcome::Failure("The functionality check was cancelled".into()));
    assert_torn_down(&harness);
}

#[tokio::test]
async fn dropping_a_run_future_releases_its_resources() {
    let (_dir, mut config) = project(&[("index.html", &titled("Hi"))]);
    config.test_timeout_ms = None;
    let harness = FunctionalityHarness::new(config);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(150),
        harness.run("functionality", FileCheck::new("index.html", ["debug('waiting');"])),
    )
    .await;

    assert!(abandoned.is_err());
    assert_eq!(harness.contexts().created_contexts(), 1);
    assert_torn_down(&harness);
}

#[tokio::test]
async fn concurrent_runs_do_not_observe_each_other() {
    let (_dir, config) = project(&[
        ("a.html", &titled("A")),
        ("b.html", &titled("B")),
        ("c.html", &titled("C")),
    ]);
    let (harness, events) = recording(config);
    let title_check = "if (document.title === 'A') { pass(); } else { fail(document.title); }";

    let outcomes = harness
        .run_all(
            "functionality",
            vec![
                FileCheck::new("a.html", [title_check, "pass();"]),
                FileCheck::new("b.html", [title_check]),
                FileCheck::new("c.html", ["pass();", title_check]),
            ],
        )
        .await;

    assert_eq!(
        outcomes,
        vec![
            Outcome::Success,
            Outcome::Failure("B".into()),
            Outcome::Failure("C".into()),
        ]
    );
    assert!(matches!(
        events.lock().first(),
        Some(ProgressEvent::GroupStarted { group, .. }) if group == "functionality"
    ));
    assert_torn_down(&harness);
}

#[tokio::test]
async fn pass_followed_by_fail_advances_exactly_once() {
    let (_dir, config) = project(&[("index.html", &titled("Hi"))]);
    let (harness, events) = recording(config);

    let outcome = harness
        .run(
            "functionality",
            FileCheck::new("index.html", ["pass(); fail('late');", "debug('second'); pass();"]),
        )
        .await;

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(debug_messages(&events), vec!["second".to_string()]);
}

#[tokio::test]
async fn asynchronous_page_behaviour_is_observable() {
    let page = r#"<!doctype html>
<html><head><title>Menu</title>
<style>.menu { display: none; } .menu.open { display: block; }</style>
</head><body>
<button id="toggle">Menu</button>
<nav class="menu"><a href="/">Home</a></nav>
<script src="js/main.js"></script>
</body></html>"#;
    let script = r#"
document.getElementById('toggle').addEventListener('click', () => {
  setTimeout(() => document.querySelector('.menu').classList.toggle('open'), 300);
});
"#;
    let (_dir, config) = project(&[("index.html", page), ("js/main.js", script)]);
    let harness = FunctionalityHarness::new(config);

    let outcome = harness
        .run(
            "functionality",
            FileCheck::new(
                "index.html",
                [
                    "if (css($('.menu')).display === 'none') pass(); else fail('Menu should start hidden');",
                    r#"
                    $('#toggle').dispatchEvent(ev('click'));
                    setTimeout(() => {
                      if (css($('.menu')).display === 'block') pass();
                      else fail('Menu did not open');
                    }, 500);
                    "#,
                ],
            ),
        )
        .await;

    assert_eq!(outcome, Outcome::Success);
}

#[tokio::test]
async fn unreadable_page_reports_a_load_failure() {
    let (dir, config) = project(&[]);
    std::fs::write(dir.path().join("bad.html"), [0xff, 0xfe, 0x00, 0xc3]).expect("write bytes");
    let harness = FunctionalityHarness::new(config);

    let outcome = harness
        .run("functionality", FileCheck::new("bad.html", ["pass();"]))
        .await;

    match outcome {
        Outcome::Failure(reason) => {
            assert!(reason.starts_with("The page “bad.html” could not be loaded:"), "{reason}");
        }
        Outcome::Success => panic!("an undecodable page must not pass"),
    }
    assert_torn_down(&harness);
}

#[tokio::test]
async fn context_destroy_is_idempotent() {
    let (dir, _config) = project(&[("index.html", &titled("Hi"))]);
    let bus = SignalBus::new();
    let label = RunLabel::generate("index.html");
    let mut subscription = bus.subscribe(label.clone()).expect("subscribe");
    let manager = ContextManager::new();

    let mut context = manager
        .create(&dir.path().join("index.html"), bus.sender(label), SurfaceOptions::default())
        .expect("create context");
    context.wait_until_ready().await.expect("page ready");
    context
        .execute(page_functionality::InjectedTest {
            index: 0,
            source: "pass();".into(),
        })
        .expect("inject");
    assert_eq!(subscription.recv().await, Some(Signal::Pass));

    context.destroy();
    context.destroy();
    assert!(!context.is_alive());
    assert_eq!(manager.live_contexts(), 0);
    assert!(context
        .execute(page_functionality::InjectedTest {
            index: 1,
            source: "pass();".into(),
        })
        .is_err());
    drop(context);
    assert_eq!(manager.live_contexts(), 0);
    assert_eq!(manager.created_contexts(), 1);
}

#[tokio::test]
async fn pages_without_skeleton_tags_still_have_a_body() {
    let (_dir, config) = project(&[("index.html", "<!doctype html><title>Hi</title><h1>Hi</h1>")]);
    let harness = FunctionalityHarness::new(config);

    let outcome = harness
        .run(
            "functionality",
            FileCheck::new(
                "index.html",
                [
                    "if (document.body && $('body h1')) pass(); else fail('no body');",
                    "if (document.title === 'Bye') pass(); else fail('Wrong title');",
                ],
            ),
        )
        .await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.failure_reason(), Some("Wrong title"));
    assert_eq!(Outcome::Success.failure_reason(), None);
    assert_torn_down(&harness);
}

#[tokio::test]
async fn self_referencing_debug_output_does_not_crash_the_run() {
    let (_dir, config) = project(&[("index.html", &titled("Hi"))]);
    let (harness, events) = recording(config);

    let outcome = harness
        .run(
            "functionality",
            FileCheck::new(
                "index.html",
                ["const o = { a: 1 }; o.self = o; debug(o); JSON.stringify(o); pass();"],
            ),
        )
        .await;

    assert_eq!(outcome.failure_reason(), Some(GENERIC_REASON));
    let messages = debug_messages(&events);
    assert_eq!(messages[0], r#"{"a":1,"self":[Circular]}"#);
    assert!(messages[1].contains("Converting circular structure to JSON"));
}
