use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use indexmap::IndexSet;
use snapname_contracts::config::RenameConfig;
use snapname_contracts::events::{ProgressEvent, ProgressSink};
use snapname_contracts::runs::summary::RunSummary;

use crate::batch::BatchRenamer;
use crate::folder::Folder;
use crate::oracle::{DeadlineOracle, NamingOracle};
use crate::retry::{RetryOutcome, RetryRenamer};

const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Shared stop request, checked between batches, during the inter-batch pause
/// and between individual retries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives the batch pass and then the retry pass over one directory.
pub struct Orchestrator {
    config: RenameConfig,
    oracle: Arc<dyn NamingOracle>,
    sink: Arc<dyn ProgressSink>,
    run_id: String,
}

impl Orchestrator {
    /// Every oracle call made by the run is bounded by
    /// `config.oracle_timeout_seconds`.
    pub fn new(
        config: RenameConfig,
        oracle: Arc<dyn NamingOracle>,
        sink: Arc<dyn ProgressSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let oracle: Arc<dyn NamingOracle> =
            Arc::new(DeadlineOracle::new(oracle, config.oracle_timeout()));
        Ok(Self {
            config,
            oracle,
            sink,
            run_id: new_run_id(),
        })
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &RenameConfig {
        &self.config
    }

    /// Renames every eligible image in `dir`.
    ///
    /// Per-file failures end up in the summary; only an unreadable directory
    /// fails the run. A cancelled run leaves unreached files under their
    /// original names and counts them as `not_attempted`.
    pub fn run(&self, dir: &Path, cancel: &CancelFlag) -> anyhow::Result<RunSummary> {
        let started_at = now_utc_iso();
        let mut folder = Folder::open(dir)
            .with_context(|| format!("failed to read directory {}", dir.display()))?;
        let eligible = folder
            .discover_eligible(&self.config)
            .with_context(|| format!("failed to list directory {}", dir.display()))?;
        let batches: Vec<&[String]> = eligible.chunks(self.config.batch_size).collect();

        let mut summary = RunSummary {
            run_id: self.run_id.clone(),
            directory: folder.root().display().to_string(),
            started_at,
            eligible: eligible.len(),
            ..RunSummary::default()
        };
        tracing::info!(
            run_id = %self.run_id,
            directory = %summary.directory,
            oracle = self.oracle.name(),
            eligible = eligible.len(),
            batches = batches.len(),
            "rename run started"
        );
        self.sink.publish(&ProgressEvent::RunStarted {
            directory: summary.directory.clone(),
            eligible: eligible.len(),
            batches: batches.len(),
        });

        let mut cancelled = false;
        let mut attempted_in_batches = 0_usize;
        let mut retry_list: IndexSet<String> = IndexSet::new();
        let batch_renamer = BatchRenamer::new(self.oracle.as_ref(), &self.config, self.sink.as_ref());
        for (index, files) in batches.iter().enumerate() {
            if index > 0 && !self.pause_between_batches(cancel) {
                cancelled = true;
                break;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.sink.publish(&ProgressEvent::BatchStarted {
                batch: index + 1,
                batches: batches.len(),
                files: files.to_vec(),
            });
            let outcome = batch_renamer.process_batch(&mut folder, files);
            attempted_in_batches += files.len();
            summary.renamed_in_batch += outcome.renamed.len();
            tracing::info!(
                batch = index + 1,
                batches = batches.len(),
                renamed = outcome.renamed.len(),
                deferred = outcome.failed_for_retry.len(),
                "batch completed"
            );
            self.sink.publish(&ProgressEvent::BatchCompleted {
                batch: index + 1,
                batches: batches.len(),
                renamed: outcome.renamed.len(),
                deferred: outcome.failed_for_retry.len(),
            });
            retry_list.extend(
                outcome
                    .failed_for_retry
                    .into_iter()
                    .map(|deferred| deferred.original),
            );
        }

        let mut retried = 0_usize;
        if !cancelled {
            let retry_renamer =
                RetryRenamer::new(self.oracle.as_ref(), &self.config, self.sink.as_ref());
            for original in &retry_list {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                match retry_renamer.retry_one(&mut folder, original) {
                    Ok(RetryOutcome::Renamed { .. }) => summary.renamed_in_retry += 1,
                    Ok(RetryOutcome::RestoredOriginal { .. }) => summary.restored_original += 1,
                    Err(stranded) => summary.stranded.push(stranded),
                }
                retried += 1;
            }
        }

        summary.not_attempted =
            (eligible.len() - attempted_in_batches) + (retry_list.len() - retried);
        summary.cancelled = cancelled;
        summary.finished_at = now_utc_iso();
        if cancelled {
            tracing::warn!(
                run_id = %self.run_id,
                not_attempted = summary.not_attempted,
                "rename run cancelled"
            );
        }
        tracing::info!(
            run_id = %self.run_id,
            renamed = summary.renamed(),
            restored = summary.restored_original,
            stranded = summary.stranded.len(),
            "rename run completed"
        );
        self.sink.publish(&ProgressEvent::RunCompleted {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// Runs on a dedicated worker thread so the caller stays responsive.
    pub fn spawn(self, dir: impl Into<PathBuf>) -> anyhow::Result<RunHandle> {
        let dir = dir.into();
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let join = thread::Builder::new()
            .name("snapname-worker".to_string())
            .spawn(move || self.run(&dir, &worker_cancel))
            .context("failed to start rename worker")?;
        Ok(RunHandle { cancel, join })
    }

    /// Returns `false` when cancelled before the pause ran out.
    fn pause_between_batches(&self, cancel: &CancelFlag) -> bool {
        let delay = self.config.inter_batch_delay();
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tracing::debug!(delay_s = delay.as_secs(), "pausing between batches");
        let deadline = Instant::now() + delay;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }
}

/// A run in progress on its worker thread.
pub struct RunHandle {
    cancel: CancelFlag,
    join: JoinHandle<anyhow::Result<RunSummary>>,
}

impl RunHandle {
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) -> anyhow::Result<RunSummary> {
        self.join
            .join()
            .map_err(|_| anyhow!("rename worker panicked"))?
    }
}

pub fn new_run_id() -> String {
    format!("rename-{}", Utc::now().format("%Y%m%dT%H%M%S"))
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false)
}
