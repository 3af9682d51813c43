//! Retry, timeout, and validation settings bound to a node.

/// Where schema validation runs relative to a node handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    None,
    In,
    Out,
    Both,
}

impl ValidationMode {
    pub fn validates_in(self) -> bool {
        matches!(self, ValidationMode::In | ValidationMode::Both)
    }

    pub fn validates_out(self) -> bool {
        matches!(self, ValidationMode::Out | ValidationMode::Both)
    }
}

/// Per-node retry/timeout/validation configuration.
///
/// Defaults mirror SPEC_FULL.md §3.4: no retries, no backoff, no timeout,
/// validation off. Retry is only ever triggered by an unhandled handler
/// error ([`crate::error::NodeError::Other`]) — validation failures are
/// always terminal.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct NodePolicy {
    pub validate: ValidationMode,
    pub max_retries: u32,
    pub backoff_base: f64,
    pub backoff_mult: f64,
    pub max_backoff: f64,
    pub timeout_s: Option<f64>,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            validate: ValidationMode::None,
            max_retries: 0,
            backoff_base: 0.0,
            backoff_mult: 1.0,
            max_backoff: f64::INFINITY,
            timeout_s: None,
        }
    }
}

impl NodePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validate(mut self, mode: ValidationMode) -> Self {
        self.validate = mode;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_base: f64, backoff_mult: f64) -> Self {
        self.max_retries = max_retries;
        self.backoff_base = backoff_base;
        self.backoff_mult = backoff_mult;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: f64) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_timeout(mut self, timeout_s: f64) -> Self {
        self.timeout_s = Some(timeout_s);
        self
    }

    /// Delay before the attempt numbered `attempt` (1-indexed: `attempt=1`
    /// is the delay before the *second* overall try).
    pub fn backoff_delay(&self, attempt: u32) -> f64 {
        let exp = self.backoff_mult.powi(attempt as i32 - 1);
        (self.backoff_base * exp).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = NodePolicy::new().with_retries(3, 0.01, 2.0).with_max_backoff(0.02);
        assert!((policy.backoff_delay(1) - 0.01).abs() < 1e-9);
        assert!((policy.backoff_delay(2) - 0.02).abs() < 1e-9);
        // third retry would be 0.04 uncapped, capped to 0.02
        assert!((policy.backoff_delay(3) - 0.02).abs() < 1e-9);
    }

    #[test]
    fn validation_mode_flags() {
        assert!(ValidationMode::Both.validates_in());
        assert!(ValidationMode::Both.validates_out());
        assert!(ValidationMode::In.validates_in());
        assert!(!ValidationMode::In.validates_out());
        assert!(!ValidationMode::None.validates_in());
    }
}
