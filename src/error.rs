use thiserror::Error;

/// Errors raised while configuring the engine.
///
/// Decoding itself never fails: malformed constructs are left in place. Only
/// building an [`Environment`](crate::Environment) or a
/// [`DecoderConfig`](crate::DecoderConfig) can be rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("callable name `{0}` is not a valid identifier")]
    InvalidCallableName(String),

    /// The name belongs to host functionality that executes code, spawns
    /// processes or touches files.
    #[error("callable `{0}` names host functionality and cannot be registered")]
    ForbiddenCallable(String),

    #[error("callable `{0}` is already registered")]
    DuplicateCallable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
