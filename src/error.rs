//! Error kinds surfaced by the inference core.

/// Failures raised while running a generative procedure or a sampler.
///
/// `ImpossibleTrace` is the only recoverable kind: rejection sampling
/// retries on it and an MH step treats it as a certain rejection. The
/// other kinds abort whatever driver observed them.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// The current execution landed on an event of probability zero.
    #[error("trace has zero probability")]
    ImpossibleTrace,

    /// Internal bookkeeping was caught in an inconsistent state.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Bad parameters, rejected before (or instead of) sampling.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl Error {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }
}
