//! Retry strategies.
//!
//! A [`RetryPolicy`] names one of three strategies. The strategy is asked
//! after every failed attempt whether to retry, at which consistency, or
//! give up.

use std::fmt;
use std::sync::Arc;

use crate::error::{ExecutionError, WriteType};
use crate::options::{Consistency, RetryPolicy};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the request again at the given consistency.
    Retry(Consistency),
    /// Surface the failure to the caller.
    Rethrow,
    /// Report success with an empty result.
    Ignore,
}

/// Decides whether a failed attempt is retried.
pub trait RetryStrategy: fmt::Debug + Send + Sync {
    /// The policy this strategy implements.
    fn policy(&self) -> RetryPolicy;

    /// `retries` is the number of retries already made for this request.
    /// A write that timed out is only sent again when `idempotent` is set.
    fn decide(&self, error: &ExecutionError, retries: u32, idempotent: bool) -> RetryDecision;
}

/// Map a policy to its strategy.
pub fn strategy_for(policy: RetryPolicy) -> Arc<dyn RetryStrategy> {
    match policy {
        RetryPolicy::Default => Arc::new(DefaultRetry),
        RetryPolicy::Downgrading => Arc::new(DowngradingConsistencyRetry),
        RetryPolicy::Fallthrough => Arc::new(FallthroughRetry),
    }
}

/// Retries once when the failure looks transient at the same level.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetry;

impl RetryStrategy for DefaultRetry {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy::Default
    }

    fn decide(&self, error: &ExecutionError, retries: u32, idempotent: bool) -> RetryDecision {
        if retries > 0 {
            return RetryDecision::Rethrow;
        }
        match error {
            // Enough replicas answered but the one holding data did not.
            ExecutionError::ReadTimeout {
                consistency,
                received,
                required,
                data_present,
            } if received >= required && !data_present => RetryDecision::Retry(*consistency),
            ExecutionError::WriteTimeout {
                consistency,
                write_type: WriteType::BatchLog,
                ..
            } if idempotent => RetryDecision::Retry(*consistency),
            ExecutionError::Unavailable { consistency, .. } => RetryDecision::Retry(*consistency),
            _ => RetryDecision::Rethrow,
        }
    }
}

/// Retries at a lower consistency when too few replicas answer.
///
/// The achieved level may be weaker than the requested one; callers see it
/// on the execution info of the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct DowngradingConsistencyRetry;

impl DowngradingConsistencyRetry {
    fn max_likely_to_work(known_ok: u32) -> Option<Consistency> {
        match known_ok {
            0 => None,
            1 => Some(Consistency::One),
            2 => Some(Consistency::Two),
            _ => Some(Consistency::Three),
        }
    }

    fn downgrade(consistency: Consistency, known_ok: u32) -> RetryDecision {
        // Serial reads cannot be downgraded.
        if matches!(consistency, Consistency::Serial | Consistency::LocalSerial) {
            return RetryDecision::Rethrow;
        }
        match Self::max_likely_to_work(known_ok) {
            Some(level) => RetryDecision::Retry(level),
            None => RetryDecision::Rethrow,
        }
    }
}

impl RetryStrategy for DowngradingConsistencyRetry {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy::Downgrading
    }

    fn decide(&self, error: &ExecutionError, retries: u32, idempotent: bool) -> RetryDecision {
        if retries > 0 {
            return RetryDecision::Rethrow;
        }
        match *error {
            ExecutionError::ReadTimeout {
                consistency,
                received,
                required,
                data_present,
            } => {
                if received < required {
                    Self::downgrade(consistency, received)
                } else if !data_present {
                    RetryDecision::Retry(consistency)
                } else {
                    RetryDecision::Rethrow
                }
            }
            ExecutionError::WriteTimeout {
                consistency,
                received,
                write_type,
                ..
            } => match write_type {
                // The write is persisted on at least one replica and will
                // be replayed by hinted handoff.
                WriteType::Simple | WriteType::Batch if received > 0 => RetryDecision::Ignore,
                WriteType::UnloggedBatch if idempotent => Self::downgrade(consistency, received),
                WriteType::BatchLog if idempotent => RetryDecision::Retry(consistency),
                _ => RetryDecision::Rethrow,
            },
            ExecutionError::Unavailable {
                consistency, alive, ..
            } => Self::downgrade(consistency, alive),
            _ => RetryDecision::Rethrow,
        }
    }
}

/// Never retries; the first error reaches the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallthroughRetry;

impl RetryStrategy for FallthroughRetry {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy::Fallthrough
    }

    fn decide(&self, _error: &ExecutionError, _retries: u32, _idempotent: bool) -> RetryDecision {
        RetryDecision::Rethrow
    }
}
