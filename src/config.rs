use super::*;
use crate::context::SurfaceOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// Harness settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Directory that check paths are resolved against.
    pub project_root: PathBuf,
    /// Pause between dual readiness and the first dispatch.
    pub settle_delay_ms: u64,
    /// Bound on each test's wait for `pass`/`fail`; `None` waits forever.
    pub test_timeout_ms: Option<u64>,
    /// Bound on the wait for the page to become ready.
    pub load_timeout_ms: Option<u64>,
    /// Timer callbacks one test may run before it is left to the timeout.
    pub timer_step_limit: usize,
    /// Interpreter steps one script run may take.
    pub script_step_limit: u64,
    pub viewport: Viewport,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            settle_delay_ms: 200,
            test_timeout_ms: Some(10_000),
            load_timeout_ms: Some(30_000),
            timer_step_limit: 10_000,
            script_step_limit: 5_000_000,
            viewport: Viewport::default(),
        }
    }
}

impl HarnessConfig {
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            project_root: root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.script_step_limit == 0 {
            return Err(Error::Config("script_step_limit must be positive".into()));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::Config("viewport dimensions must be positive".into()));
        }
        Ok(())
    }

    pub fn surface_options(&self) -> SurfaceOptions {
        SurfaceOptions {
            viewport: self.viewport,
            settle_delay_ms: self.settle_delay_ms,
            timer_step_limit: self.timer_step_limit,
            script_step_limit: self.script_step_limit,
        }
    }
}
