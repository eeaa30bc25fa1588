use snapname_contracts::config::RenameConfig;
use snapname_contracts::events::{ProgressEvent, ProgressSink, RenamePhase};
use snapname_contracts::runs::summary::StrandedFile;

use crate::error::{error_chain_text, FileFailure, RenameStage};
use crate::folder::Folder;
use crate::naming::split_name;
use crate::oracle::NamingOracle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Renamed { renamed: String },
    RestoredOriginal { reason: String },
}

/// Retries one file on its own under a temporary alias.
///
/// The alias gives the oracle a plain name to look at and isolates the file
/// while it is in flight. When `retry_one` returns, the file carries either its
/// descriptive name or its exact original name, or it is reported stranded.
pub struct RetryRenamer<'a> {
    oracle: &'a dyn NamingOracle,
    config: &'a RenameConfig,
    sink: &'a dyn ProgressSink,
}

impl<'a> RetryRenamer<'a> {
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

    /// `Err` only when the file could not be moved back from its alias.
    pub fn retry_one(
        &self,
        folder: &mut Folder,
        original: &str,
    ) -> Result<RetryOutcome, StrandedFile> {
        let (_, ext) = split_name(original);
        let alias = folder.claim_temp_alias(ext);

        if let Err(err) = folder.rename(RenameStage::TemporaryAlias, original, &alias) {
            folder.release(&alias);
            let reason = error_chain_text(&err);
            return Ok(self.restored(original, reason));
        }
        tracing::debug!(file = original, alias = %alias, "retrying under temporary alias");
        self.sink.publish(&ProgressEvent::FileRetried {
            original: original.to_string(),
            temporary: alias.clone(),
        });

        match self.label_and_finalize(folder, &alias, original) {
            Ok(renamed) => {
                folder.release(&alias);
                tracing::debug!(file = original, renamed = %renamed, "renamed on retry");
                self.sink.publish(&ProgressEvent::FileRenamed {
                    phase: RenamePhase::Retry,
                    original: original.to_string(),
                    renamed: renamed.clone(),
                });
                Ok(RetryOutcome::Renamed { renamed })
            }
            Err(failure) => {
                let reason = error_chain_text(&failure);
                match folder.rename(RenameStage::Restore, &alias, original) {
                    Ok(()) => {
                        folder.release(&alias);
                        Ok(self.restored(original, reason))
                    }
                    Err(restore_err) => {
                        let stranded = StrandedFile {
                            directory: folder.root().display().to_string(),
                            original: original.to_string(),
                            temporary: alias,
                            error: format!(
                                "{}; after retry failure: {reason}",
                                error_chain_text(&restore_err)
                            ),
                        };
                        tracing::error!(
                            directory = %stranded.directory,
                            file = original,
                            temporary = %stranded.temporary,
                            error = %stranded.error,
                            "could not restore original filename"
                        );
                        self.sink.publish(&ProgressEvent::FileStranded {
                            file: stranded.clone(),
                        });
                        Err(stranded)
                    }
                }
            }
        }
    }

    fn label_and_finalize(
        &self,
        folder: &mut Folder,
        alias: &str,
        original: &str,
    ) -> Result<String, FileFailure> {
        let image = folder.load_image(alias, self.config)?;
        let label = self.oracle.label_single(&image)?;
        folder.rename_to_title(alias, original, &label.short_title, self.config)
    }

    fn restored(&self, original: &str, reason: String) -> RetryOutcome {
        tracing::warn!(file = original, reason = %reason, "retry failed; original name kept");
        self.sink.publish(&ProgressEvent::FileRestored {
            original: original.to_string(),
            reason: reason.clone(),
        });
        RetryOutcome::RestoredOriginal { reason }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use snapname_contracts::config::RenameConfig;

    use super::{RetryOutcome, RetryRenamer};
    use crate::folder::Folder;
    use crate::testing::{write_image, RecordingSink, ScriptedOracle};

    fn listing(dir: &std::path::Path) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    #[test]
    fn successful_retry_renames_from_alias() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_image(temp.path(), "IMG 0042.jpeg", 8, 8)?;
        let oracle = ScriptedOracle::new().single_title("Foggy Harbor");
        let sink = RecordingSink::default();
        let config = RenameConfig::default();
        let mut folder = Folder::open(temp.path())?;

        let outcome = RetryRenamer::new(&oracle, &config, &sink)
            .retry_one(&mut folder, "IMG 0042.jpeg");

        assert_eq!(
            outcome,
            Ok(RetryOutcome::Renamed {
                renamed: "Foggy_Harbor_DESC.jpeg".to_string()
            })
        );
        assert_eq!(listing(temp.path())?, vec!["Foggy_Harbor_DESC.jpeg"]);
        let calls = oracle.single_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("temp_retry_"));
        assert!(calls[0].ends_with(".jpeg"));
        assert_eq!(sink.kinds(), vec!["file_retried", "file_renamed"]);
        Ok(())
    }

    #[test]
    fn failing_oracle_restores_exact_original_name() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_image(temp.path(), "weird name!.png", 8, 8)?;
        let before = fs::read(&path)?;
        let oracle = ScriptedOracle::new().single_error("quota exhausted");
        let sink = RecordingSink::default();
        let config = RenameConfig::default();
        let mut folder = Folder::open(temp.path())?;

        let outcome = RetryRenamer::new(&oracle, &config, &sink)
            .retry_one(&mut folder, "weird name!.png");

        match outcome {
            Ok(RetryOutcome::RestoredOriginal { reason }) => {
                assert!(reason.contains("quota exhausted"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(listing(temp.path())?, vec!["weird name!.png"]);
        assert_eq!(fs::read(&path)?, before);
        assert_eq!(sink.kinds(), vec!["file_retried", "file_restored"]);
        Ok(())
    }

    #[test]
    fn corrupt_image_is_restored_without_oracle_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("broken.jpg"), b"nope")?;
        let oracle = ScriptedOracle::new().single_title("Never Used");
        let sink = RecordingSink::default();
        let config = RenameConfig::default();
        let mut folder = Folder::open(temp.path())?;

        let outcome = RetryRenamer::new(&oracle, &config, &sink)
            .retry_one(&mut folder, "broken.jpg");

        assert!(matches!(outcome, Ok(RetryOutcome::RestoredOriginal { .. })));
        assert_eq!(listing(temp.path())?, vec!["broken.jpg"]);
        assert!(oracle.single_calls().is_empty());
        Ok(())
    }

    #[test]
    fn missing_source_fails_before_any_oracle_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let oracle = ScriptedOracle::new().single_title("Never Used");
        let sink = RecordingSink::default();
        let config = RenameConfig::default();
        let mut folder = Folder::open(temp.path())?;

        let outcome = RetryRenamer::new(&oracle, &config, &sink)
            .retry_one(&mut folder, "vanished.png");

        assert!(matches!(outcome, Ok(RetryOutcome::RestoredOriginal { .. })));
        assert!(oracle.single_calls().is_empty());
        assert_eq!(sink.kinds(), vec!["file_restored"]);
        assert!(listing(temp.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn unusable_title_restores_original() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_image(temp.path(), "a.gif.png", 8, 8)?;
        let oracle = ScriptedOracle::new().single_title("***");
        let sink = RecordingSink::default();
        let config = RenameConfig::default();
        let mut folder = Folder::open(temp.path())?;

        let outcome = RetryRenamer::new(&oracle, &config, &sink).retry_one(&mut folder, "a.gif.png");

        assert!(matches!(outcome, Ok(RetryOutcome::RestoredOriginal { .. })));
        assert_eq!(listing(temp.path())?, vec!["a.gif.png"]);
        Ok(())
    }

    #[test]
    fn occupied_original_name_strands_the_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_image(temp.path(), "a.png", 8, 8)?;
        let squatter = temp.path().join("a.png");
        let oracle = ScriptedOracle::new()
            .single_error("boom")
            .on_single(move || {
                // something else grabs the original name while the file is aliased
                let _ = fs::write(&squatter, b"squatter");
            });
        let sink = RecordingSink::default();
        let config = RenameConfig::default();
        let mut folder = Folder::open(temp.path())?;

        let outcome = RetryRenamer::new(&oracle, &config, &sink).retry_one(&mut folder, "a.png");

        let stranded = match outcome {
            Err(stranded) => stranded,
            other => panic!("expected stranded file, got {other:?}"),
        };
        assert_eq!(stranded.original, "a.png");
        assert!(stranded.temporary.starts_with("temp_retry_"));
        assert_eq!(stranded.directory, temp.path().display().to_string());
        assert!(temp.path().join(&stranded.temporary).is_file());
        assert_eq!(sink.kinds(), vec!["file_retried", "file_stranded"]);
        Ok(())
    }
}
