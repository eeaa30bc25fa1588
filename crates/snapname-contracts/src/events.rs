use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};

use anyhow::{anyhow, bail, Context};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::runs::summary::{RunSummary, StrandedFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenamePhase {
    Batch,
    Retry,
}

/// Progress vocabulary emitted after every per-file and per-batch transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        directory: String,
        eligible: usize,
        batches: usize,
    },
    BatchStarted {
        batch: usize,
        batches: usize,
        files: Vec<String>,
    },
    BatchCompleted {
        batch: usize,
        batches: usize,
        renamed: usize,
        deferred: usize,
    },
    FileRenamed {
        phase: RenamePhase,
        original: String,
        renamed: String,
    },
    /// The file could not be settled by its batch and moves to the retry pass.
    FileDeferred { original: String, reason: String },
    /// A retry attempt began; the file now sits under `temporary`.
    FileRetried { original: String, temporary: String },
    FileRestored { original: String, reason: String },
    FileStranded {
        #[serde(flatten)]
        file: StrandedFile,
    },
    RunCompleted { summary: RunSummary },
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::BatchStarted { .. } => "batch_started",
            Self::BatchCompleted { .. } => "batch_completed",
            Self::FileRenamed { .. } => "file_renamed",
            Self::FileDeferred { .. } => "file_deferred",
            Self::FileRetried { .. } => "file_retried",
            Self::FileRestored { .. } => "file_restored",
            Self::FileStranded { .. } => "file_stranded",
            Self::RunCompleted { .. } => "run_completed",
        }
    }
}

/// Consumer of progress events. Publishing never fails the run.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: &ProgressEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _event: &ProgressEvent) {}
}

impl ProgressSink for mpsc::Sender<ProgressEvent> {
    fn publish(&self, event: &ProgressEvent) {
        // receiver hung up; the run keeps going without a listener
        let _ = self.send(event.clone());
    }
}

#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for FanoutSink {
    fn publish(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}

/// JSONL progress log. Each line is one event object stamped with `run_id`
/// and an RFC 3339 `ts`; the file is opened on first write and kept open.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<EventLog>,
}

#[derive(Debug)]
struct EventLog {
    path: PathBuf,
    run_id: String,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(EventLog {
                path: path.into(),
                run_id: run_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    /// Appends `event` and returns the line as written.
    pub fn record(&self, event: &ProgressEvent) -> anyhow::Result<Value> {
        let Value::Object(fields) = serde_json::to_value(event)? else {
            bail!("{} event is not a JSON object", event.kind());
        };
        let mut line = Map::with_capacity(fields.len() + 2);
        line.insert(
            "run_id".to_string(),
            Value::String(self.shared.run_id.clone()),
        );
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        line.extend(fields);
        let text = serde_json::to_string(&line)?;

        let mut guard = self
            .shared
            .file
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(open_append(&self.shared.path)?);
        }
        let Some(file) = guard.as_mut() else {
            bail!("event log {} is not open", self.shared.path.display());
        };
        writeln!(file, "{text}")?;
        Ok(Value::Object(line))
    }
}

fn open_append(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

impl ProgressSink for EventWriter {
    fn publish(&self, event: &ProgressEvent) {
        if let Err(err) = self.record(event) {
            tracing::warn!(
                path = %self.path().display(),
                event = event.kind(),
                error = %err,
                "failed to append progress event"
            );
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
