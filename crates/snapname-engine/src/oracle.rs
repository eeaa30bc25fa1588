//! The naming oracle boundary.
//!
//! Oracles turn image bytes into short titles. Whatever an oracle returns is run
//! through [`parse_batch_labels`] / [`parse_single_label`] so that downstream code
//! only ever sees fully validated values.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OracleCallError;

/// One prepared image as handed to an oracle.
#[derive(Debug, Clone)]
pub struct OracleImage {
    /// Identifier the oracle must echo back in batch mode (the on-disk filename).
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelResult {
    pub original_filename: String,
    pub short_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleLabel {
    pub short_title: String,
}

#[derive(Debug, Deserialize)]
struct BatchLabels {
    descriptions: Vec<RawLabel>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    original_filename: String,
    short_title: String,
}

pub trait NamingOracle: Send + Sync {
    fn name(&self) -> &str;

    /// Labels every image in one call. Entries may be missing or out of order.
    fn label_batch(&self, images: &[OracleImage]) -> Result<Vec<LabelResult>, OracleCallError>;

    fn label_single(&self, image: &OracleImage) -> Result<SingleLabel, OracleCallError>;
}

/// Parses `{"descriptions": [{"original_filename", "short_title"}, ...]}`.
///
/// A response that does not fit the schema is rejected whole. An entry with a
/// blank filename or title is dropped, which leaves its file omitted.
pub fn parse_batch_labels(text: &str) -> Result<Vec<LabelResult>, OracleCallError> {
    let parsed: BatchLabels = serde_json::from_str(strip_code_fence(text))
        .map_err(|err| OracleCallError::Malformed(format!("batch schema mismatch: {err}")))?;
    Ok(parsed
        .descriptions
        .into_iter()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let original_filename = raw.original_filename.trim().to_string();
            let short_title = raw.short_title.trim().to_string();
            if original_filename.is_empty() || short_title.is_empty() {
                tracing::warn!(
                    entry = idx,
                    filename = %original_filename,
                    "dropping batch entry with a blank field"
                );
                return None;
            }
            Some(LabelResult {
                original_filename,
                short_title,
            })
        })
        .collect())
}

/// Parses `{"short_title": "..."}`.
pub fn parse_single_label(text: &str) -> Result<SingleLabel, OracleCallError> {
    let parsed: SingleLabel = serde_json::from_str(strip_code_fence(text))
        .map_err(|err| OracleCallError::Malformed(format!("single schema mismatch: {err}")))?;
    let short_title = parsed.short_title.trim().to_string();
    if short_title.is_empty() {
        return Err(OracleCallError::Malformed(
            "short_title is empty".to_string(),
        ));
    }
    Ok(SingleLabel { short_title })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Abandons calls to the wrapped oracle after `timeout`.
///
/// The abandoned call keeps running on its own thread; its result is dropped.
pub struct DeadlineOracle {
    inner: Arc<dyn NamingOracle>,
    timeout: Duration,
}

impl DeadlineOracle {
    pub fn new(inner: Arc<dyn NamingOracle>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn call_with_deadline<T, F>(&self, call: F) -> Result<T, OracleCallError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, OracleCallError> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("snapname-oracle".to_string())
            .spawn(move || {
                let _ = tx.send(call());
            })
            .map_err(|err| OracleCallError::Rejected(format!("could not start oracle call: {err}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    oracle = self.inner.name(),
                    timeout_s = self.timeout.as_secs_f64(),
                    "oracle call abandoned after deadline"
                );
                Err(OracleCallError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(OracleCallError::Rejected(
                "oracle call ended without a result".to_string(),
            )),
        }
    }
}

impl NamingOracle for DeadlineOracle {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn label_batch(&self, images: &[OracleImage]) -> Result<Vec<LabelResult>, OracleCallError> {
        let inner = Arc::clone(&self.inner);
        let images = images.to_vec();
        self.call_with_deadline(move || inner.label_batch(&images))
    }

    fn label_single(&self, image: &OracleImage) -> Result<SingleLabel, OracleCallError> {
        let inner = Arc::clone(&self.inner);
        let image = image.clone();
        self.call_with_deadline(move || inner.label_single(&image))
    }
}
