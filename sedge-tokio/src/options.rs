/*!
Per-client transaction and retry options.
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Serializable,
    RepeatableRead,
}

/// Options for transactions started by
/// [`Client::transaction`](crate::Client::transaction).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub(crate) isolation: IsolationLevel,
    pub(crate) read_only: bool,
    pub(crate) deferrable: bool,
}

/// Which class of failure a retry rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryCondition {
    TransactionConflict,
    NetworkError,
}

/// How many attempts to make and how long to sleep between them.
#[derive(Clone)]
pub struct RetryRule {
    pub(crate) attempts: u32,
    pub(crate) backoff: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
}

/// Retry rules per failure class.
#[derive(Clone, Debug)]
pub struct RetryOptions {
    default: RetryRule,
    overrides: HashMap<RetryCondition, RetryRule>,
}

impl TransactionOptions {
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    pub(crate) fn start_command(&self) -> String {
        let mut text = String::from("START TRANSACTION ISOLATION ");
        match self.isolation {
            IsolationLevel::Serializable => text.push_str("SERIALIZABLE"),
            IsolationLevel::RepeatableRead => text.push_str("REPEATABLE READ"),
        }
        if self.read_only {
            text.push_str(", READ ONLY");
        } else {
            text.push_str(", READ WRITE");
        }
        if self.deferrable {
            text.push_str(", DEFERRABLE");
        } else {
            text.push_str(", NOT DEFERRABLE");
        }
        text
    }
}

impl std::fmt::Debug for RetryRule {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RetryRule")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl Default for RetryRule {
    fn default() -> RetryRule {
        RetryRule {
            attempts: 3,
            backoff: Arc::new(|n| {
                Duration::from_micros(
                    (2u64.saturating_pow(n) * 100_000) as u64
                        + (rand::random::<f64>() * 100_000.0 * 2u64.saturating_pow(n) as f64)
                            as u64,
                )
            }),
        }
    }
}

impl Default for RetryOptions {
    fn default() -> RetryOptions {
        RetryOptions {
            default: RetryRule::default(),
            overrides: HashMap::new(),
        }
    }
}

impl RetryOptions {
    pub fn with_rule(
        mut self,
        condition: RetryCondition,
        attempts: u32,
        backoff: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.overrides.insert(
            condition,
            RetryRule {
                attempts,
                backoff: Arc::new(backoff),
            },
        );
        self
    }

    pub(crate) fn rule(&self, condition: RetryCondition) -> &RetryRule {
        self.overrides.get(&condition).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_command_text() {
        let options = TransactionOptions::default();
        assert_eq!(
            options.start_command(),
            "START TRANSACTION ISOLATION SERIALIZABLE, READ WRITE, NOT DEFERRABLE"
        );
        let options = TransactionOptions::default()
            .read_only(true)
            .deferrable(true);
        assert_eq!(
            options.start_command(),
            "START TRANSACTION ISOLATION SERIALIZABLE, READ ONLY, DEFERRABLE"
        );
    }

    #[test]
    fn retry_rule_override() {
        let options =
            RetryOptions::default().with_rule(RetryCondition::NetworkError, 5, |_| {
                Duration::from_millis(1)
            });
        assert_eq!(options.rule(RetryCondition::NetworkError).attempts, 5);
        assert_eq!(options.rule(RetryCondition::TransactionConflict).attempts, 3);
        // Default backoff grows with the attempt number, with jitter.
        let rule = RetryRule::default();
        let first = (rule.backoff)(0);
        let third = (rule.backoff)(2);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(200));
        assert!(third >= Duration::from_millis(400) && third < Duration::from_millis(800));
    }
}
