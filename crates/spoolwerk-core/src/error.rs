// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Spoolwerk.

use thiserror::Error;

use crate::types::{ErrorKind, JobError};

/// Top-level error type for all Spoolwerk operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    // -- Device errors --
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("host spooler error: {0}")]
    Host(String),

    // -- Job errors --
    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("invalid print settings: {0}")]
    InvalidSettings(String),

    #[error("strategy {strategy} failed: {detail}")]
    StrategyFailed { strategy: String, detail: String },

    #[error("all delivery strategies failed: {0}")]
    AllStrategiesFailed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    // -- Document errors --
    #[error("unsupported document type: {0}")]
    UnsupportedDocument(String),

    #[error("PDF operation failed: {0}")]
    PdfError(String),

    #[error("image processing failed: {0}")]
    ImageError(String),

    // -- Plumbing --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SpoolError {
    /// Where this error lands in the job-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Self::SourceNotFound(_) => ErrorKind::SourceNotFound,
            Self::InvalidSettings(_) => ErrorKind::InvalidSettings,
            Self::StrategyFailed { .. }
            | Self::UnsupportedDocument(_)
            | Self::PdfError(_)
            | Self::ImageError(_)
            | Self::Host(_) => ErrorKind::StrategyFailed,
            Self::AllStrategiesFailed(_) => ErrorKind::AllStrategiesFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::SourceNotFound,
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl From<&SpoolError> for JobError {
    fn from(err: &SpoolError) -> Self {
        JobError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<SpoolError> for JobError {
    fn from(err: SpoolError) -> Self {
        JobError::from(&err)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpoolError>;
