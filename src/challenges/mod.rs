//! IUAM challenge handling.
//!
//! - [`analysis`] captures the challenge tokens and reduces the embedded
//!   operation to arithmetic.
//! - [`arithmetic`] evaluates that arithmetic.
//! - [`solver`] combines both into the replay parameters and prepares the
//!   follow-up request.

pub mod analysis;
pub mod arithmetic;
pub mod solver;

use thiserror::Error;

pub use analysis::{ChallengePage, parse_challenge_page, reduce_operation};
pub use arithmetic::{ArithmeticError, evaluate};
pub use solver::{ChallengeParameters, ChallengeSolver, DEFAULT_CHALLENGE_DELAY};

/// Reasons a 403 page could not be turned into replay parameters.
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("challenge operation not found in page")]
    MissingOperation,
    #[error("challenge field '{0}' not found in page")]
    MissingField(&'static str),
    #[error("challenge operation reduced to nothing")]
    EmptyOperation,
    #[error("challenge url has no host")]
    MissingHost,
    #[error("challenge arithmetic failed: {0}")]
    Arithmetic(#[from] ArithmeticError),
}
