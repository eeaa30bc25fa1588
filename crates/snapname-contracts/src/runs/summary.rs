use std::path::Path;

use serde::{Deserialize, Serialize};

/// A file whose restore-to-original rename failed. It still exists on disk under
/// `temporary` inside `directory` and needs manual recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandedFile {
    pub directory: String,
    pub original: String,
    pub temporary: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub directory: String,
    pub started_at: String,
    pub finished_at: String,
    pub eligible: usize,
    pub renamed_in_batch: usize,
    pub renamed_in_retry: usize,
    pub restored_original: usize,
    /// Files never reached because the run was cancelled. They keep their original names.
    pub not_attempted: usize,
    pub cancelled: bool,
    pub stranded: Vec<StrandedFile>,
}

impl RunSummary {
    pub fn renamed(&self) -> usize {
        self.renamed_in_batch + self.renamed_in_retry
    }

    /// Files left under their original name for any reason.
    pub fn untouched(&self) -> usize {
        self.restored_original + self.not_attempted
    }

    pub fn needs_intervention(&self) -> bool {
        !self.stranded.is_empty()
    }
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}
