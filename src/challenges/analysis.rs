//! Challenge page parsing.
//!
//! Extracts the hidden form tokens and the embedded operation from an IUAM
//! page, and reduces the operation to a plain arithmetic expression.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ChallengeError;

static OPERATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"setTimeout\(function\(\)\{\s+(var t,r,a,f.+?\r?\n[\s\S]+?a\.value =.+?)\r?\n")
        .unwrap()
});

static PASS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"name="pass" value="(.+?)""#).unwrap());

static CHALLENGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"name="jschl_vc" value="(\w+)""#).unwrap());

/// `a.value = <expr> + t.length;` keeps only `<expr>`.
static HOST_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"a\.value =(.+?) \+ .+?;").unwrap());

/// Indented single-letter assignments and member accesses (DOM plumbing).
static NOISE_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s{3,}[a-z](?: = |\.).+").unwrap());

const ANSWER_TARGET: &str = "a.value =";

/// Raw pieces captured from a challenge page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePage {
    pub operation: String,
    pub pass: String,
    pub jschl_vc: String,
}

/// Capture operation, `pass` and `jschl_vc` from `body`.
pub fn parse_challenge_page(body: &str) -> Result<ChallengePage, ChallengeError> {
    let operation = OPERATION_RE
        .captures(body)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(ChallengeError::MissingOperation)?;
    let pass = capture_token(&PASS_RE, body).ok_or(ChallengeError::MissingField("pass"))?;
    let jschl_vc =
        capture_token(&CHALLENGE_RE, body).ok_or(ChallengeError::MissingField("jschl_vc"))?;

    Ok(ChallengePage {
        operation,
        pass,
        jschl_vc,
    })
}

fn capture_token(pattern: &Regex, body: &str) -> Option<String> {
    pattern
        .captures(body)
        .and_then(|captures| captures.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned())
}

/// Reduce a captured operation to the arithmetic assigned to `a.value`.
///
/// The host-length suffix and DOM plumbing lines are removed; whatever is
/// assigned in the final statement is returned. If the reduction leaves
/// something that is not arithmetic, evaluation rejects it.
pub fn reduce_operation(operation: &str) -> Result<String, ChallengeError> {
    let stripped = HOST_SUFFIX_RE.replace_all(operation, "a.value =$1;");

    let joined: String = stripped
        .lines()
        .filter(|line| line.contains(ANSWER_TARGET) || !NOISE_LINE_RE.is_match(line))
        .map(|line| line.trim_end_matches('\r'))
        .collect();

    let last = joined
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .last()
        .ok_or(ChallengeError::EmptyOperation)?;

    let expression = match last.rfind(ANSWER_TARGET) {
        Some(index) => &last[index + ANSWER_TARGET.len()..],
        None => last,
    };
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(ChallengeError::EmptyOperation);
    }
    Ok(expression.to_string())
}
