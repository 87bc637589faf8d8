//! Solver for IUAM (JavaScript v1) challenges.
//!
//! Computes `jschl_answer` from the page and rewrites the session's request
//! spec so that replaying it submits the answer.

use std::time::Duration;

use url::Url;

use super::ChallengeError;
use super::analysis::{parse_challenge_page, reduce_operation};
use super::arithmetic::{ArithmeticError, evaluate};
use crate::request::{EncodingError, RequestSpec};

/// Delay the challenge page asks browsers to wait before submitting.
pub const DEFAULT_CHALLENGE_DELAY: Duration = Duration::from_millis(6000);

/// Status code that marks a potential challenge page.
pub const CHALLENGE_STATUS: i32 = 403;

/// Values submitted back to the challenge endpoint, as the tokens sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeParameters {
    pub jschl_vc: String,
    pub pass: String,
    /// Decimal integer.
    pub jschl_answer: String,
}

impl ChallengeParameters {
    /// Query parameters in submission order.
    pub fn pairs(&self) -> [(&'static str, String); 3] {
        [
            ("jschl_vc", self.jschl_vc.clone()),
            ("pass", self.pass.clone()),
            ("jschl_answer", self.jschl_answer.clone()),
        ]
    }
}

/// Solves challenge pages and prepares the replay request.
#[derive(Debug, Clone)]
pub struct ChallengeSolver {
    delay: Duration,
}

impl Default for ChallengeSolver {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_DELAY)
    }
}

impl ChallengeSolver {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a response with this status may carry a challenge.
    pub fn is_challenge_status(code: i32) -> bool {
        code == CHALLENGE_STATUS
    }

    /// Compute the replay parameters for the challenge page `body` served from `url`.
    pub fn solve(&self, url: &Url, body: &str) -> Result<ChallengeParameters, ChallengeError> {
        let host = url.host_str().ok_or(ChallengeError::MissingHost)?;
        let page = parse_challenge_page(body)?;
        let expression = reduce_operation(&page.operation)?;
        let value = evaluate(&expression)?;
        let jschl_answer = answer(value, host.len())?;
        log::debug!("challenge for {host}: {expression} = {value}, answer {jschl_answer}");

        Ok(ChallengeParameters {
            jschl_vc: page.jschl_vc,
            pass: page.pass,
            jschl_answer: jschl_answer.to_string(),
        })
    }

    /// Sleep for the configured delay.
    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            log::info!("waiting {:?} before submitting challenge answer", self.delay);
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Rewrite `spec` into the replay request: a fresh header/body set with a
    /// `Referer` to the challenged URL, a random agent and the answer params.
    pub fn prepare_replay(
        &self,
        spec: &mut RequestSpec,
        url: &Url,
        params: &ChallengeParameters,
    ) -> Result<(), EncodingError> {
        spec.header("Referer", url.as_str())
            .random_user_agent(true)
            .url(url.clone())
            .params(params.pairs(), true)?;
        Ok(())
    }
}

/// `trunc(value) + host_len`, refusing anything that does not fit an `i64`.
fn answer(value: f64, host_len: usize) -> Result<i64, ArithmeticError> {
    // 2^63 is exact in f64; i64::MAX is not.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    let truncated = value.trunc();
    let out_of_range = || ArithmeticError::OutOfRange(value.to_string());
    if !(-LIMIT..LIMIT).contains(&truncated) {
        return Err(out_of_range());
    }
    let host_len = i64::try_from(host_len).map_err(|_| out_of_range())?;
    (truncated as i64).checked_add(host_len).ok_or_else(out_of_range)
}
