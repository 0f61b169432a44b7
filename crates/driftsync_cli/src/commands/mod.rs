//! CLI command implementations.

pub mod compare;
pub mod down;
pub mod inspect;
pub mod winner;

use thiserror::Error;

/// Errors raised while reading command input.
#[derive(Debug, Error)]
pub enum InputError {
    /// A header string is not of the form `A/(A1,B2)/T=10`.
    #[error("invalid header {0:?}, expected CLIENT/(CLOCK)/T=MILLIS")]
    InvalidHeader(String),
}
