//! # reqsession-rs
//!
//! A session-oriented HTTP request builder: configure a request fluently,
//! attach URL-encoded or multipart bodies (including files and remote
//! resources), and get back a decoded response while cookies persist across
//! requests.
//!
//! ## Features
//!
//! - Fluent `RequestSpec` with a fresh header/body set per request
//! - URL-encoded and `multipart/form-data` bodies with charset control
//! - Automatic `gzip`/`deflate` response decoding
//! - Cookie persistence across requests of a session
//! - Retry of transient transport failures
//! - Transparent replay of legacy IUAM (JavaScript v1) challenges
//! - Pluggable transport, with reqwest and in-memory implementations
//!
//! ## Example
//!
//! ```no_run
//! use reqsession_rs::Session;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::new();
//!     session
//!         .request()
//!         .url(Url::parse("https://example.com/login")?)
//!         .params([("user", "me"), ("password", "secret")], true)?;
//!     let response = session.response().await?;
//!     println!("{} with {} cookie(s)", response.code(), session.cookies().len());
//!     Ok(())
//! }
//! ```

mod session;

pub mod challenges;
pub mod cookies;
pub mod events;
pub mod probe;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;
pub mod user_agents;

pub use crate::session::{
    DEFAULT_RETRY_INTERVAL,
    Session,
    SessionBuilder,
    SessionConfig,
    SessionError,
    SessionResult,
};

pub use crate::challenges::{
    ArithmeticError,
    ChallengeError,
    ChallengeParameters,
    ChallengeSolver,
    DEFAULT_CHALLENGE_DELAY,
    evaluate,
};

pub use crate::cookies::{CookieProcessor, CookieSet, HeaderCookieProcessor, NoCookies};

pub use crate::events::{
    ChallengeHandled,
    ChallengeOutcome,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    RequestFailed,
    RequestStarted,
    ResponseReceived,
    RetryScheduled,
    SessionEvent,
};

pub use crate::probe::UrlProbe;

pub use crate::request::{
    BodyBuffer,
    BuildState,
    ByteStream,
    Charset,
    EncodingError,
    RequestSpec,
    Resource,
};

pub use crate::response::{Response, ResponseDecoder, ResponseError, UNKNOWN_STATUS};

pub use crate::retry::{FailureKind, RetryDecision, RetryPolicy, TransientFailure};

pub use crate::transport::{
    Connection,
    ConnectionError,
    ConnectionExecutor,
    Connector,
    MemoryConnector,
    ReqwestConnector,
    ScriptedResponse,
    SentRequest,
    StreamingMode,
};

pub use crate::user_agents::{
    FixedUserAgent,
    UserAgentCatalog,
    UserAgentError,
    UserAgentProvider,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
