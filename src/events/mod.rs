//! Session lifecycle events.
//!
//! A [`Session`](crate::Session) reports every exchange it performs as a
//! [`SessionEvent`]: when a request goes out, when its response is decoded,
//! when a retry is scheduled, when a 403 page is examined as a challenge and
//! when a failure is given up on. Handlers are plain synchronous callbacks;
//! keep them cheap, they run inline on the request path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::Method;
use url::Url;

#[derive(Debug, Clone)]
pub struct RequestStarted {
    pub url: Url,
    pub method: Method,
    /// Whether a form or multipart body is written.
    pub has_body: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResponseReceived {
    pub url: Url,
    pub method: Method,
    /// `-1` when the status line could not be read.
    pub status: i32,
    /// Cookies extracted from this response.
    pub new_cookies: usize,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// What became of a 403 examined as a challenge page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Solved { answer: String },
    Unsolved { reason: String },
}

#[derive(Debug, Clone)]
pub struct ChallengeHandled {
    pub host: String,
    pub outcome: ChallengeOutcome,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryScheduled {
    pub host: String,
    /// 1-indexed retry number.
    pub attempt: u32,
    pub reason: String,
    pub delay: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RequestFailed {
    pub host: String,
    pub error: String,
    pub transient: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    RequestStarted(RequestStarted),
    ResponseReceived(ResponseReceived),
    ChallengeHandled(ChallengeHandled),
    RetryScheduled(RetryScheduled),
    RequestFailed(RequestFailed),
}

impl SessionEvent {
    /// Short stable name, handy for filtering and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::RequestStarted(_) => "request_started",
            SessionEvent::ResponseReceived(_) => "response_received",
            SessionEvent::ChallengeHandled(_) => "challenge_handled",
            SessionEvent::RetryScheduled(_) => "retry_scheduled",
            SessionEvent::RequestFailed(_) => "request_failed",
        }
    }
}

/// Receives session events.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Fans events out to registered handlers in registration order.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(&self, event: SessionEvent) {
        for handler in &self.handlers {
            handler.on_event(&event);
        }
    }
}

impl Extend<Arc<dyn EventHandler>> for EventDispatcher {
    fn extend<I: IntoIterator<Item = Arc<dyn EventHandler>>>(&mut self, handlers: I) {
        self.handlers.extend(handlers);
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Renders events through the `log` facade.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::RequestStarted(started) => {
                let body = if started.has_body { " with body" } else { "" };
                log::debug!("-> {} {}{body}", started.method, started.url);
            }
            SessionEvent::ResponseReceived(received) => {
                log::debug!(
                    "<- {} {} = {} in {}ms, {} new cookie(s)",
                    received.method,
                    received.url,
                    received.status,
                    received.latency.as_millis(),
                    received.new_cookies
                );
            }
            SessionEvent::ChallengeHandled(handled) => match &handled.outcome {
                ChallengeOutcome::Solved { answer } => {
                    log::info!("challenge from {} answered with {answer}", handled.host);
                }
                ChallengeOutcome::Unsolved { reason } => {
                    log::info!("challenge from {} left unanswered: {reason}", handled.host);
                }
            },
            SessionEvent::RetryScheduled(retry) => {
                log::info!(
                    "retry #{} for {} in {}ms: {}",
                    retry.attempt,
                    retry.host,
                    retry.delay.as_millis(),
                    retry.reason
                );
            }
            SessionEvent::RequestFailed(failed) => {
                let kind = if failed.transient { "transient" } else { "permanent" };
                log::warn!("request to {} failed ({kind}): {}", failed.host, failed.error);
            }
        }
    }
}
