//! Error types for the location core.
//!
//! Public operations mostly report success as `bool` / response codes
//! and log the detail; these enums are what gets logged, and what the
//! engine trait returns.

/// Failure returned by the positioning engine for a downward request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LocApiError {
    /// The engine does not implement this request.
    #[error("request not supported by the engine")]
    Unsupported,

    /// The engine is not open yet, or is shutting down.
    #[error("engine not ready")]
    NotReady,

    #[error("engine busy")]
    EngineBusy,

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("general engine failure")]
    GeneralFailure,
}

/// Invalid value in the environment configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}
