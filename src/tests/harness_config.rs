use super::*;
use crate::config::{HarnessConfig, Viewport};
use crate::harness::FileCheck;

#[test]
fn empty_config_uses_defaults() -> Result<()> {
    let config = HarnessConfig::from_json_str("{}")?;
    assert_eq!(config, HarnessConfig::default());
    assert_eq!(config.settle_delay_ms, 200);
    assert_eq!(config.test_timeout_ms, Some(10_000));
    assert_eq!(config.load_timeout_ms, Some(30_000));
    assert_eq!(config.viewport, Viewport { width: 800, height: 600 });
    Ok(())
}

#[test]
fn config_fields_override_and_null_disables_timeouts() -> Result<()> {
    let config = HarnessConfig::from_json_str(
        r#"{
            "project_root": "/srv/site",
            "settle_delay_ms": 0,
            "test_timeout_ms": null,
            "viewport": { "width": 1280, "height": 720 }
        }"#,
    )?;
    assert_eq!(config.project_root, std::path::PathBuf::from("/srv/site"));
    assert_eq!(config.settle_delay_ms, 0);
    assert_eq!(config.test_timeout_ms, None);
    assert_eq!(config.load_timeout_ms, Some(30_000));
    let options = config.surface_options();
    assert_eq!(options.viewport.width, 1280);
    assert_eq!(options.settle_delay_ms, 0);
    Ok(())
}

#[test]
fn unknown_config_fields_are_rejected() {
    match HarnessConfig::from_json_str(r#"{ "settle_dealy_ms": 5 }"#) {
        Err(Error::Config(message)) => assert!(message.contains("settle_dealy_ms")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn zero_sized_viewport_is_rejected() {
    let result = HarnessConfig::from_json_str(r#"{ "viewport": { "width": 0, "height": 10 } }"#);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn file_checks_parse_from_json() -> Result<()> {
    let checks = FileCheck::list_from_json_str(
        r#"[
            { "path": "index.html", "tests": ["pass();", "fail('x');"] },
            { "path": "about.html" }
        ]"#,
    )?;
    assert_eq!(checks.len(), 2);
    assert_eq!(checks[0], FileCheck::new("index.html", ["pass();", "fail('x');"]));
    assert!(checks[1].tests.is_empty());
    Ok(())
}

#[test]
fn with_root_keeps_other_defaults() {
    let config = HarnessConfig::with_root("student");
    assert_eq!(config.project_root, std::path::PathBuf::from("student"));
    assert_eq!(config.script_step_limit, 5_000_000);
}
