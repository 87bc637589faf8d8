//! Session orchestration.
//!
//! A [`Session`] owns the request spec being configured, the cookies
//! collected so far and the collaborators that execute requests. Each call
//! to [`Session::response`] builds and decodes one exchange, retrying
//! transient transport failures and replaying solved IUAM challenges.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use url::Url;

use crate::challenges::{ChallengeError, ChallengeSolver, DEFAULT_CHALLENGE_DELAY};
use crate::cookies::{CookieProcessor, CookieSet};
use crate::events::{
	ChallengeHandled, ChallengeOutcome, EventDispatcher, EventHandler, LoggingHandler,
	RequestFailed, RequestStarted, ResponseReceived, RetryScheduled, SessionEvent,
};
use crate::request::{Charset, EncodingError, RequestSpec};
use crate::response::{Response, ResponseDecoder, ResponseError};
use crate::retry::{RetryDecision, RetryPolicy, TransientFailure};
use crate::transport::{Connection, ConnectionError, ConnectionExecutor, Connector, ReqwestConnector};
use crate::user_agents::{UserAgentCatalog, UserAgentProvider};

/// Default pause between retries.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Result alias used across the session layer.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by [`Session`].
#[derive(Debug, Error)]
pub enum SessionError {
	#[error("connection failed: {0}")]
	Connection(#[from] ConnectionError),
	#[error("response failed: {0}")]
	Response(#[from] ResponseError),
	#[error("body encoding failed: {0}")]
	Encoding(#[from] EncodingError),
	#[error("url parse error: {0}")]
	Url(#[from] url::ParseError),
}

impl TransientFailure for SessionError {
	fn is_transient(&self) -> bool {
		match self {
			SessionError::Connection(err) => err.is_transient(),
			SessionError::Response(err) => err.is_transient(),
			SessionError::Encoding(EncodingError::Io(err)) => err.is_transient(),
			_ => false,
		}
	}
}

/// Session configuration used by the builder.
#[derive(Clone)]
pub struct SessionConfig {
	pub connector: Option<Arc<dyn Connector>>,
	pub user_agents: Option<Arc<dyn UserAgentProvider>>,
	pub cookie_processor: Option<Arc<dyn CookieProcessor>>,
	pub max_trials: u32,
	pub retry_interval: Duration,
	pub solve_challenges: bool,
	pub challenge_delay: Duration,
	pub charset: Charset,
	pub event_handlers: Vec<Arc<dyn EventHandler>>,
	pub enable_logging_events: bool,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			connector: None,
			user_agents: None,
			cookie_processor: None,
			max_trials: 0,
			retry_interval: DEFAULT_RETRY_INTERVAL,
			solve_challenges: true,
			challenge_delay: DEFAULT_CHALLENGE_DELAY,
			charset: Charset::Utf8,
			event_handlers: Vec::new(),
			enable_logging_events: true,
		}
	}
}

/// Fluent builder for [`Session`].
pub struct SessionBuilder {
	config: SessionConfig,
}

impl SessionBuilder {
	pub fn new() -> Self {
		Self {
			config: SessionConfig::default(),
		}
	}

	pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
		self.config.connector = Some(connector);
		self
	}

	pub fn with_user_agents(mut self, provider: Arc<dyn UserAgentProvider>) -> Self {
		self.config.user_agents = Some(provider);
		self
	}

	pub fn with_cookie_processor(mut self, processor: Arc<dyn CookieProcessor>) -> Self {
		self.config.cookie_processor = Some(processor);
		self
	}

	/// Retry transient failures up to `max_trials` times, `interval` apart.
	pub fn with_retries(mut self, max_trials: u32, interval: Duration) -> Self {
		self.config.max_trials = max_trials;
		self.config.retry_interval = interval;
		self
	}

	pub fn with_challenge_delay(mut self, delay: Duration) -> Self {
		self.config.challenge_delay = delay;
		self
	}

	pub fn with_charset(mut self, charset: Charset) -> Self {
		self.config.charset = charset;
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.config.event_handlers.push(handler);
		self
	}

	pub fn disable_challenge_solving(mut self) -> Self {
		self.config.solve_challenges = false;
		self
	}

	pub fn disable_logging_events(mut self) -> Self {
		self.config.enable_logging_events = false;
		self
	}

	pub fn build(self) -> Session {
		Session::with_config(self.config)
	}
}

impl Default for SessionBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Stateful request session: one spec, one cookie jar, sequential exchanges.
pub struct Session {
	config: SessionConfig,
	spec: RequestSpec,
	cookies: CookieSet,
	executor: ConnectionExecutor,
	retry: RetryPolicy,
	solver: Option<ChallengeSolver>,
	events: Arc<EventDispatcher>,
}

impl Session {
	/// Construct a session with default configuration.
	pub fn new() -> Self {
		Session::with_config(SessionConfig::default())
	}

	/// Obtain a builder to customise the session.
	pub fn builder() -> SessionBuilder {
		SessionBuilder::new()
	}

	pub fn with_config(config: SessionConfig) -> Self {
		let connector: Arc<dyn Connector> = config
			.connector
			.clone()
			.unwrap_or_else(|| Arc::new(ReqwestConnector::new()));
		let user_agents: Arc<dyn UserAgentProvider> = config
			.user_agents
			.clone()
			.unwrap_or_else(|| Arc::new(UserAgentCatalog::builtin()));

		let mut spec = RequestSpec::new();
		if let Some(processor) = &config.cookie_processor {
			spec.cookie_processor(Arc::clone(processor));
		}

		let mut events = EventDispatcher::new();
		if config.enable_logging_events {
			events.register_handler(Arc::new(LoggingHandler));
		}
		events.extend(config.event_handlers.iter().cloned());

		Self {
			executor: ConnectionExecutor::new(connector, user_agents),
			retry: RetryPolicy::new(config.max_trials, config.retry_interval),
			solver: config
				.solve_challenges
				.then(|| ChallengeSolver::new(config.challenge_delay)),
			spec,
			cookies: CookieSet::new(),
			events: Arc::new(events),
			config,
		}
	}

	/// The spec for the next request.
	pub fn request(&mut self) -> &mut RequestSpec {
		&mut self.spec
	}

	pub fn spec(&self) -> &RequestSpec {
		&self.spec
	}

	pub fn cookies(&self) -> &CookieSet {
		&self.cookies
	}

	pub fn add_cookies<I, S>(&mut self, cookies: I)
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.cookies.extend(cookies);
	}

	pub fn clear_cookies(&mut self) {
		self.cookies.clear();
	}

	pub fn retry_policy(&self) -> RetryPolicy {
		self.retry
	}

	/// Full reset of the request spec; cookies are kept.
	pub fn reset(&mut self) -> &mut RequestSpec {
		self.spec.reset();
		if let Some(processor) = &self.config.cookie_processor {
			self.spec.cookie_processor(Arc::clone(processor));
		}
		&mut self.spec
	}

	/// Open and prepare a connection for the current spec without reading it.
	pub async fn build(&mut self) -> SessionResult<Box<dyn Connection>> {
		Ok(self.executor.build(&mut self.spec, &self.cookies).await?)
	}

	/// Execute the current spec and decode the response.
	///
	/// Transient failures are retried per the configured policy. A 403 that
	/// turns out to be a solvable challenge is answered and the replay's
	/// response returned instead; any other response, whatever its status, is
	/// returned as is.
	pub async fn response(&mut self) -> SessionResult<Response> {
		let response = self.execute_with_retry().await?;
		let solver = match &self.solver {
			Some(solver) if ChallengeSolver::is_challenge_status(response.code()) => solver.clone(),
			_ => return Ok(response),
		};
		self.answer_challenge(&solver, response).await
	}

	/// Point the request at `url` and execute it.
	pub async fn response_for(&mut self, url: Url) -> SessionResult<Response> {
		self.spec.url(url);
		self.response().await
	}

	/// Execute the current spec and read the whole decoded body.
	pub async fn bytes(&mut self) -> SessionResult<Vec<u8>> {
		let response = self.response().await?;
		Ok(response.into_bytes().map_err(ResponseError::from)?)
	}

	async fn answer_challenge(
		&mut self,
		solver: &ChallengeSolver,
		response: Response,
	) -> SessionResult<Response> {
		let url = response.url().clone();
		let (response, body) = response.take_body().map_err(ResponseError::from)?;
		let page = self.config.charset.decode(&body);

		match solver.solve(&url, &page) {
			Ok(params) => {
				log::info!("solved challenge for {url}, replaying after {:?}", solver.delay());
				self.dispatch_challenge(
					&url,
					ChallengeOutcome::Solved {
						answer: params.jschl_answer.clone(),
					},
				);
				solver.wait().await;
				solver.prepare_replay(&mut self.spec, &url, &params)?;
				self.execute_with_retry().await
			}
			Err(err) => {
				self.report_unsolved(&url, &err);
				Ok(response.with_body(body))
			}
		}
	}

	fn report_unsolved(&self, url: &Url, err: &ChallengeError) {
		match err {
			ChallengeError::MissingOperation | ChallengeError::MissingField(_) => {
				log::debug!("403 from {url} is not a challenge page: {err}");
			}
			_ => log::warn!("unable to solve challenge from {url}: {err}"),
		}
		self.dispatch_challenge(
			url,
			ChallengeOutcome::Unsolved {
				reason: err.to_string(),
			},
		);
	}

	async fn execute_with_retry(&mut self) -> SessionResult<Response> {
		let mut retries_done = 0;
		loop {
			let err = match self.execute_once().await {
				Ok(response) => return Ok(response),
				Err(err) => err,
			};

			match self.retry.decide(RetryPolicy::classify(&err), retries_done) {
				RetryDecision::Retry { delay, attempt } => {
					let host = self.target_host();
					log::info!("retrying {host} ({attempt}/{}) after: {err}", self.retry.max_trials());
					self.events.dispatch(SessionEvent::RetryScheduled(RetryScheduled {
						host,
						attempt,
						reason: err.to_string(),
						delay,
						timestamp: chrono::Utc::now(),
					}));
					if !delay.is_zero() {
						tokio::time::sleep(delay).await;
					}
					retries_done = attempt;
				}
				RetryDecision::DoNotRetry { reason } => {
					log::debug!("not retrying: {reason}");
					self.events.dispatch(SessionEvent::RequestFailed(RequestFailed {
						host: self.target_host(),
						error: err.to_string(),
						transient: err.is_transient(),
						timestamp: chrono::Utc::now(),
					}));
					return Err(err);
				}
			}
		}
	}

	async fn execute_once(&mut self) -> SessionResult<Response> {
		let method = self.spec.effective_method();
		if let Some(url) = self.spec.get_url() {
			self.events.dispatch(SessionEvent::RequestStarted(RequestStarted {
				url: url.clone(),
				method: method.clone(),
				has_body: self.spec.body_buffer().has_output(),
				timestamp: chrono::Utc::now(),
			}));
		}

		let started = Instant::now();
		let connection = self.executor.build(&mut self.spec, &self.cookies).await?;
		let decoder = ResponseDecoder::new(self.spec.get_cookie_processor());
		let response = decoder.decode(connection).await?;

		let new_cookies = response.cookies().len();
		self.cookies.extend(response.cookies().iter().cloned());
		if new_cookies > 0 {
			log::debug!("session holds {} cookie(s)", self.cookies.len());
		}

		self.events.dispatch(SessionEvent::ResponseReceived(ResponseReceived {
			url: response.url().clone(),
			method,
			status: response.code(),
			new_cookies,
			latency: started.elapsed(),
			timestamp: chrono::Utc::now(),
		}));
		Ok(response)
	}

	fn dispatch_challenge(&self, url: &Url, outcome: ChallengeOutcome) {
		self.events.dispatch(SessionEvent::ChallengeHandled(ChallengeHandled {
			host: url.host_str().unwrap_or_default().to_string(),
			outcome,
			timestamp: chrono::Utc::now(),
		}));
	}

	fn target_host(&self) -> String {
		self.spec
			.get_url()
			.and_then(Url::host_str)
			.unwrap_or_default()
			.to_string()
	}
}

impl Default for Session {
	fn default() -> Self {
		Self::new()
	}
}
