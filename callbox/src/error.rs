use thiserror::Error;

/// Errors returned synchronously when a call cannot be created.
///
/// Everything that goes wrong after a call was accepted (transport failures,
/// exhausted retries, undecodable bodies) is delivered through the call's
/// failure subscribers as a [`Failure`](crate::Failure) instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Call options were not a structured object.
    #[error("request options must be an object, got {found}")]
    InvalidOptions {
        /// JSON type that was supplied instead.
        found: &'static str,
    },

    /// Call options were an object whose fields could not be read.
    #[error("invalid request options: {0}")]
    Options(#[from] serde_json::Error),

    /// Calls schedule timers and transport attempts on the tokio runtime.
    #[error("requests must be issued from within a tokio runtime")]
    NoRuntime,
}
