//! Context configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::DEFAULT_WAIT_TIMEOUT;

/// Settings for one [`AsyncContext`](crate::context::AsyncContext) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Upper bound on one consumer wait while the queue is empty.
    pub wait_timeout: Duration,

    /// Name of the dedicated context thread.
    pub thread_name: String,

    /// Overall deadline for the run. `None` waits forever.
    pub run_timeout: Option<Duration>,
}

impl ContextConfig {
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            thread_name: "affine-context".to_string(),
            run_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_reasonable_values() {
        let config = ContextConfig::default();
        assert_eq!(config.wait_timeout, Duration::from_millis(50));
        assert_eq!(config.thread_name, "affine-context");
        assert_eq!(config.run_timeout, None);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ContextConfig =
            serde_json::from_str(r#"{ "thread_name": "inspector" }"#).unwrap();
        assert_eq!(config.thread_name, "inspector");
        assert_eq!(config.wait_timeout, DEFAULT_WAIT_TIMEOUT);
    }

    #[test]
    fn builder_methods_override() {
        let config = ContextConfig::default()
            .with_wait_timeout(Duration::from_millis(5))
            .with_run_timeout(Duration::from_secs(20));
        assert_eq!(config.wait_timeout, Duration::from_millis(5));
        assert_eq!(config.run_timeout, Some(Duration::from_secs(20)));
    }
}
