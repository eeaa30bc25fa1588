use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The file could not be read or decoded as an image.
#[derive(Debug, Error)]
#[error("failed to load image {}", path.display())]
pub struct ImageLoadError {
    pub path: PathBuf,
    #[source]
    pub source: image::ImageError,
}

/// The oracle call itself failed, for a whole batch or a single file.
#[derive(Debug, Error)]
pub enum OracleCallError {
    #[error("oracle credentials missing ({0})")]
    MissingCredentials(String),
    #[error("oracle transport failed")]
    Transport(#[source] reqwest::Error),
    #[error("oracle request failed ({code}): {body}")]
    Status { code: u16, body: String },
    #[error("oracle call timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("oracle response malformed: {0}")]
    Malformed(String),
    #[error("oracle rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameStage {
    TemporaryAlias,
    Finalize,
    Restore,
}

impl RenameStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemporaryAlias => "temporary-alias",
            Self::Finalize => "finalize",
            Self::Restore => "restore",
        }
    }
}

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("{} rename {from} -> {to} failed", stage.as_str())]
    Io {
        stage: RenameStage,
        from: String,
        to: String,
        #[source]
        source: io::Error,
    },
    #[error("{} rename target {to} already exists", stage.as_str())]
    TargetExists { stage: RenameStage, to: String },
    #[error("{} rename {from} -> {to} leaves the folder", stage.as_str())]
    OutsideFolder {
        stage: RenameStage,
        from: String,
        to: String,
    },
}

impl RenameError {
    pub fn stage(&self) -> RenameStage {
        match self {
            Self::Io { stage, .. }
            | Self::TargetExists { stage, .. }
            | Self::OutsideFolder { stage, .. } => *stage,
        }
    }
}

/// Why a single file did not reach its descriptive name.
#[derive(Debug, Error)]
pub enum FileFailure {
    #[error(transparent)]
    ImageLoad(#[from] ImageLoadError),
    #[error(transparent)]
    OracleCall(#[from] OracleCallError),
    #[error("oracle response has no entry for {filename}")]
    OracleOmission { filename: String },
    #[error("title {title:?} has no characters usable in a filename")]
    UnusableTitle { title: String },
    #[error(transparent)]
    Rename(#[from] RenameError),
}

/// Renders an error and its causes on one line.
pub fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(String::as_str) != Some(trimmed) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    parts.join(" | caused by: ")
}
