use indexmap::IndexMap;
use snapname_contracts::config::RenameConfig;
use snapname_contracts::events::{ProgressEvent, ProgressSink, RenamePhase};

use crate::error::{error_chain_text, FileFailure};
use crate::folder::Folder;
use crate::oracle::NamingOracle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedFile {
    pub original: String,
    pub renamed: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredFile {
    pub original: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub renamed: Vec<RenamedFile>,
    pub failed_for_retry: Vec<DeferredFile>,
}

impl BatchOutcome {
    fn defer(&mut self, sink: &dyn ProgressSink, original: &str, reason: String) {
        tracing::warn!(file = original, reason = %reason, "deferring file to individual retry");
        sink.publish(&ProgressEvent::FileDeferred {
            original: original.to_string(),
            reason: reason.clone(),
        });
        self.failed_for_retry.push(DeferredFile {
            original: original.to_string(),
            reason,
        });
    }
}

/// Labels a group of files with one oracle call and renames what comes back.
pub struct BatchRenamer<'a> {
    oracle: &'a dyn NamingOracle,
    config: &'a RenameConfig,
    sink: &'a dyn ProgressSink,
}

impl<'a> BatchRenamer<'a> {
    pub fn new(
        oracle: &'a dyn NamingOracle,
        config: &'a RenameConfig,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            oracle,
            config,
            sink,
        }
    }

    /// Never fails as a whole: every file either ends up renamed or in
    /// `failed_for_retry` under its original name.
    pub fn process_batch(&self, folder: &mut Folder, files: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        let mut images = Vec::with_capacity(files.len());
        for name in files {
            match folder.load_image(name, self.config) {
                Ok(image) => images.push(image),
                Err(err) => outcome.defer(self.sink, name, error_chain_text(&err)),
            }
        }
        if images.is_empty() {
            return outcome;
        }

        let labels = match self.oracle.label_batch(&images) {
            Ok(labels) => labels,
            Err(err) => {
                let reason = error_chain_text(&err);
                tracing::warn!(
                    oracle = self.oracle.name(),
                    files = images.len(),
                    reason = %reason,
                    "batch oracle call failed"
                );
                for image in &images {
                    outcome.defer(
                        self.sink,
                        &image.filename,
                        format!("batch oracle call failed: {reason}"),
                    );
                }
                return outcome;
            }
        };

        // last write wins when the oracle echoes a filename twice
        let mut titles: IndexMap<String, String> = IndexMap::with_capacity(labels.len());
        for label in labels {
            titles.insert(label.original_filename, label.short_title);
        }

        for image in &images {
            let name = image.filename.as_str();
            let Some(title) = titles.get(name) else {
                let omission = FileFailure::OracleOmission {
                    filename: name.to_string(),
                };
                outcome.defer(self.sink, name, error_chain_text(&omission));
                continue;
            };
            match folder.rename_to_title(name, name, title, self.config) {
                Ok(renamed) => {
                    tracing::debug!(file = name, renamed = %renamed, "renamed in batch");
                    self.sink.publish(&ProgressEvent::FileRenamed {
                        phase: RenamePhase::Batch,
                        original: name.to_string(),
                        renamed: renamed.clone(),
                    });
                    outcome.renamed.push(RenamedFile {
                        original: name.to_string(),
                        renamed,
                    });
                }
                Err(failure) => outcome.defer(self.sink, name, error_chain_text(&failure)),
            }
        }

        outcome
    }
}
