//! Error types for nar-pipeline
//!
//! Ordinary message flow never produces errors: elements either forward,
//! transform or discard. These types cover configuration, control-surface
//! calls that can be refused, and format negotiation with the animator.

use thiserror::Error;

/// Main error type for nar-pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared-library errors (config resolution, TOML parsing)
    #[error(transparent)]
    Common(#[from] nar_common::Error),

    /// Branch registration or lookup errors
    #[error("Branch controller error: {0}")]
    BranchController(String),

    /// Stream format rejected by the animator
    #[error("Format rejected: {0}")]
    Format(#[from] FormatError),

    /// Worker thread could not be started
    #[error("Thread spawn error: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons the animator may refuse a decoded stream format
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// Neither PCM nor DSD at this configuration is supported
    #[error("format unsupported")]
    FormatUnsupported,

    /// Sample rate exceeds what the renderer supports
    #[error("sample rate {0} Hz unsupported")]
    SampleRateUnsupported(u32),

    /// Bit depth exceeds what the renderer supports
    #[error("bit depth {0} unsupported")]
    BitDepthUnsupported(u32),
}

/// Convenience Result type using nar-pipeline Error
pub type Result<T> = std::result::Result<T, Error>;
