//! # Config
//!
//! Knobs for invocation. Rewritten bodies are always validated before they are installed, whatever the configuration.

use crate::runtime::eval::DEFAULT_STEP_LIMIT;

/// Engine configuration, see [`Runtime::with_config`](crate::runtime::Runtime::with_config)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Run post-call hooks after a pre-call hook skipped the original body
    pub run_postfix_on_skip: bool,
    /// Maximum number of instructions a single code body may execute
    pub step_limit: u64,
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_postfix_on_skip: true,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
}
impl EngineConfig {
    /// Sets [`run_postfix_on_skip`](EngineConfig::run_postfix_on_skip)
    pub fn with_postfix_on_skip(mut self, enabled: bool) -> Self {
        self.run_postfix_on_skip = enabled;
        self
    }
    /// Sets [`step_limit`](Self::step_limit)
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }
}
