use super::*;
use crate::page::SCRIPT_ERROR_REASON;

fn generic_failure() -> Signal {
    Signal::Fail(SCRIPT_ERROR_REASON.into())
}

#[test]
fn pass_and_fail_reach_the_run_channel() -> Result<()> {
    let mut t = blank()?;
    assert_eq!(t.run("pass();"), vec![Signal::Pass]);
    assert_eq!(t.run("fail('Wrong title');"), vec![Signal::Fail("Wrong title".into())]);
    assert_eq!(t.run("fail();"), vec![Signal::Fail(String::new())]);
    Ok(())
}

#[test]
fn only_the_first_control_signal_of_a_test_is_delivered() -> Result<()> {
    let mut t = blank()?;
    assert_eq!(t.run("pass(); fail('late'); pass();"), vec![Signal::Pass]);
    assert_eq!(t.run("fail('first'); pass();"), vec![Signal::Fail("first".into())]);
    Ok(())
}

#[test]
fn debug_formats_its_arguments_and_never_settles() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run("debug('count', 3, [1, 2], { a: true }, document.body);");
    assert_eq!(
        signals,
        vec![Signal::Debug(r#"count 3 [1,2] {"a":true} <body>"#.into())]
    );
    Ok(())
}

#[test]
fn uncaught_exceptions_emit_debug_then_generic_fail() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run("throw new Error('boom');");
    assert_eq!(signals.len(), 2);
    assert!(matches!(&signals[0], Signal::Debug(msg) if msg.contains("boom")));
    assert_eq!(signals[1], generic_failure());
    Ok(())
}

#[test]
fn exception_after_pass_is_reported_but_does_not_change_the_verdict() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run("pass();\nnull.explode;");
    assert_eq!(signals.len(), 2);
    assert_eq!(signals[0], Signal::Pass);
    assert!(matches!(&signals[1], Signal::Debug(msg) if msg.starts_with("TypeError")));
    Ok(())
}

#[test]
fn runaway_loops_are_stopped_by_the_step_budget() -> Result<()> {
    let options = SurfaceOptions {
        script_step_limit: 20_000,
        ..SurfaceOptions::default()
    };
    let mut t = TestPage::with_options(&[("index.html", "<p>x</p>")], options)?;
    let signals = t.run("while (true) {}");
    assert_eq!(signals.len(), 2);
    assert!(matches!(&signals[0], Signal::Debug(msg) if msg.starts_with("RangeError")));
    assert_eq!(signals[1], generic_failure());
    Ok(())
}

#[test]
fn timers_run_until_the_test_settles() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        const started = Date.now();
        let ticks = 0;
        const id = setInterval(() => {
          ticks++;
          if (ticks === 3) {
            clearInterval(id);
            setTimeout(() => {
              if (Date.now() - started >= 1000) { pass(); } else { fail('clock did not advance'); }
            }, 700);
          }
        }, 100);
        "#,
    );
    assert_eq!(signals, vec![Signal::Pass]);
    Ok(())
}

#[test]
fn timer_callback_exceptions_fail_the_owning_test() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run("setTimeout(() => { missing(); }, 10);");
    assert_eq!(signals.len(), 2);
    assert!(matches!(&signals[0], Signal::Debug(msg) if msg.contains("missing is not defined")));
    assert_eq!(signals[1], generic_failure());
    Ok(())
}

#[test]
fn silent_tests_stop_after_the_timer_budget() -> Result<()> {
    let options = SurfaceOptions {
        timer_step_limit: 50,
        ..SurfaceOptions::default()
    };
    let mut t = TestPage::with_options(&[("index.html", "<p>x</p>")], options)?;
    let signals = t.run("let n = 0; setInterval(() => { n++; }, 5);");
    assert!(signals.is_empty());
    // The surface stays usable for the next test.
    t.assert_eval("1 + 1", "2")?;
    Ok(())
}

#[test]
fn page_timers_due_within_the_settle_window_run_before_tests() -> Result<()> {
    let mut t = TestPage::from_html(
        r#"<p id="msg">waiting</p>
        <script>
          setTimeout(() => { document.getElementById('msg').textContent = 'early'; }, 50);
          setTimeout(() => { document.getElementById('msg').textContent = 'late'; }, 5000);
        </script>"#,
    )?;
    t.assert_eval("$('#msg').textContent", "early")?;
    Ok(())
}

#[test]
fn page_script_errors_surface_on_the_debug_sideband() -> Result<()> {
    let t = TestPage::from_html(
        r#"<script>window.ok = 1;</script><script>notAFunction();</script><script src="missing.js"></script>"#,
    )?;
    assert_eq!(t.load_signals.len(), 2);
    assert!(matches!(&t.load_signals[0], Signal::Debug(msg) if msg.contains("notAFunction")));
    assert!(matches!(&t.load_signals[1], Signal::Debug(msg) if msg.contains("missing.js")));
    Ok(())
}

#[test]
fn external_scripts_load_relative_to_the_page() -> Result<()> {
    let mut t = TestPage::from_files(&[
        ("site/index.html", r#"<h1 id="h">Hi</h1><script src="js/app.js"></script>"#),
        ("site/js/app.js", "document.getElementById('h').textContent = 'Ready';"),
    ])?;
    t.assert_eval("$('#h').textContent", "Ready")?;
    Ok(())
}

#[test]
fn select_all_returns_an_array_and_accepts_a_root() -> Result<()> {
    let mut t = TestPage::from_html(
        r#"<div id="a"><i>1</i><i>2</i></div><div id="b"><i>3</i></div>"#,
    )?;
    t.assert_eval("Array.isArray($$('i'))", "true")?;
    t.assert_eval("$$('i').map(el => el.textContent).join('')", "123")?;
    t.assert_eval("$$('i', $('#b')).length", "1")?;
    Ok(())
}

#[test]
fn ev_builds_bubbling_cancelable_events_with_extra_fields() -> Result<()> {
    let mut t = TestPage::from_html(r#"<input id="k">"#)?;
    let signals = t.run(
        r#"
        const e = ev('keydown', { key: 'Enter', bubbles: false });
        let seenKey = '';
        $('#k').addEventListener('keydown', (event) => { seenKey = event.key; });
        $('#k').dispatchEvent(e);
        debug(`${e.type}|${e.bubbles}|${e.cancelable}|${seenKey}|${e instanceof Event}`);
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![Signal::Debug("keydown|false|true|Enter|true".into()), Signal::Pass]
    );
    Ok(())
}

#[test]
fn capabilities_are_const_bindings() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run("try { pass = null; } catch (e) { debug(e.name); }\npass();");
    assert_eq!(signals, vec![Signal::Debug("TypeError".into()), Signal::Pass]);
    Ok(())
}

#[test]
fn tests_share_page_state_but_not_bindings() -> Result<()> {
    let mut t = blank()?;
    assert_eq!(t.run("window.counter = 1; let local = 5; pass();"), vec![Signal::Pass]);
    t.assert_eval("window.counter + (typeof local)", "1undefined")?;
    Ok(())
}

#[test]
fn dialogs_do_not_block_tests() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval(
        "[alert('hi'), confirm('sure?'), prompt('name?')].map(String).join()",
        "undefined,false,null",
    )?;
    Ok(())
}
