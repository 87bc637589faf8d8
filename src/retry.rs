//! Retry decisions for transient transport failures.
//!
//! A failed build-and-decode attempt is classified into a [`FailureKind`].
//! Only transient I/O failures (resets, timeouts, refused connections, ...)
//! are retried; a decoded response is never retried here, whatever its status.
//!
//! ```
//! use std::time::Duration;
//! use reqsession_rs::{FailureKind, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(2, Duration::from_millis(100));
//! assert_eq!(
//!     policy.decide(FailureKind::Transient, 0),
//!     RetryDecision::Retry { delay: Duration::from_millis(100), attempt: 1 }
//! );
//! assert!(matches!(
//!     policy.decide(FailureKind::Transient, 2),
//!     RetryDecision::DoNotRetry { .. }
//! ));
//! ```

use std::io;
use std::time::Duration;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// May succeed when repeated unchanged.
    Transient,
    /// Will fail again; propagate immediately.
    Permanent,
}

/// Errors that know whether repeating the operation can help.
pub trait TransientFailure {
    fn is_transient(&self) -> bool;

    fn failure_kind(&self) -> FailureKind {
        if self.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }
}

impl TransientFailure for io::Error {
    fn is_transient(&self) -> bool {
        is_transient_kind(self.kind())
    }
}

/// I/O error kinds caused by the network rather than by the request itself.
pub(crate) fn is_transient_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::NetworkDown
    )
}

/// Whether to repeat a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        /// 1-indexed retry number.
        attempt: u32,
    },
    DoNotRetry { reason: String },
}

/// Fixed-interval retry policy.
///
/// `max_trials` counts retries, not attempts: with `max_trials = 3` an
/// operation runs at most four times. Zero disables retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    max_trials: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_trials: u32, interval: Duration) -> Self {
        Self {
            max_trials,
            interval,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn max_trials(&self) -> u32 {
        self.max_trials
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.max_trials > 0
    }

    pub fn classify<E: TransientFailure + ?Sized>(error: &E) -> FailureKind {
        error.failure_kind()
    }

    /// Decide what to do after a failure, given how many retries already ran.
    pub fn decide(&self, failure: FailureKind, retries_done: u32) -> RetryDecision {
        match failure {
            FailureKind::Permanent => RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            },
            FailureKind::Transient if retries_done >= self.max_trials => {
                RetryDecision::DoNotRetry {
                    reason: format!("retry budget of {} exhausted", self.max_trials),
                }
            }
            FailureKind::Transient => {
                let attempt = retries_done + 1;
                log::debug!(
                    "scheduling retry {attempt}/{} in {:?}",
                    self.max_trials,
                    self.interval
                );
                RetryDecision::Retry {
                    delay: self.interval,
                    attempt,
                }
            }
        }
    }

    pub fn should_retry<E: TransientFailure + ?Sized>(&self, error: &E, retries_done: u32) -> bool {
        matches!(
            self.decide(Self::classify(error), retries_done),
            RetryDecision::Retry { .. }
        )
    }
}
