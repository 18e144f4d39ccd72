use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The server has already been started.
    #[error("The server has already been started")]
    AlreadyStarted,

    /// Failed to bind to address.
    #[error("Failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),
}

/// A query string that does not describe a valid log query.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    /// No `filename` parameter was given.
    #[error("No filename specified.")]
    MissingFileName,

    /// The `filename` parameter was empty.
    #[error("Filename must not be empty.")]
    EmptyFileName,

    /// A parameter that takes one value was given several.
    #[error("Parameter `{0}` must be given exactly once.")]
    Repeated(&'static str),

    /// `events` is not an integer.
    #[error("Events must be an integer, got {0:?}.")]
    InvalidEvents(String),

    /// `events` is below zero.
    #[error("Events must not be negative, got {0}.")]
    NegativeEvents(i64),
}
