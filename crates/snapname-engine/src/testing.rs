use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use image::{Rgb, RgbImage};
use snapname_contracts::events::{ProgressEvent, ProgressSink};

use crate::error::OracleCallError;
use crate::oracle::{LabelResult, NamingOracle, OracleImage, SingleLabel};

/// Writes a solid-colour image; the format follows the extension.
pub(crate) fn write_image(dir: &Path, name: &str, width: u32, height: u32) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    let shade = (name.len() * 37 % 255) as u8;
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([shade, 255 - shade, 128]);
    }
    image.save_with_format(&path, format_for(name))?;
    Ok(path)
}

fn format_for(name: &str) -> image::ImageFormat {
    let lowered = name.to_ascii_lowercase();
    if lowered.ends_with(".jpg") || lowered.ends_with(".jpeg") {
        image::ImageFormat::Jpeg
    } else {
        image::ImageFormat::Png
    }
}

pub(crate) fn image_stub(name: &str) -> OracleImage {
    OracleImage {
        filename: name.to_string(),
        mime_type: "image/jpeg".to_string(),
        bytes: vec![0xff, 0xd8, 0xff],
    }
}

type SingleHook = Box<dyn Fn() + Send + Sync>;

/// Oracle double with canned answers.
///
/// Batch calls answer every requested file that has a `title`, followed by any
/// `extra_entry` rows. Single calls pop scripted answers in order and fail once
/// the script runs dry.
#[derive(Default)]
pub(crate) struct ScriptedOracle {
    titles: HashMap<String, String>,
    extra_entries: Vec<LabelResult>,
    batch_error: Option<String>,
    singles: Mutex<VecDeque<Result<String, String>>>,
    single_hook: Option<SingleHook>,
    delay: Duration,
    batch_delay: Duration,
    batch_calls: Mutex<Vec<Vec<String>>>,
    single_calls: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn title(mut self, filename: &str, title: &str) -> Self {
        self.titles.insert(filename.to_string(), title.to_string());
        self
    }

    pub(crate) fn extra_entry(mut self, filename: &str, title: &str) -> Self {
        self.extra_entries.push(LabelResult {
            original_filename: filename.to_string(),
            short_title: title.to_string(),
        });
        self
    }

    pub(crate) fn fail_batches(mut self, message: &str) -> Self {
        self.batch_error = Some(message.to_string());
        self
    }

    pub(crate) fn single_title(self, title: &str) -> Self {
        self.push_single(Ok(title.to_string()))
    }

    pub(crate) fn single_error(self, message: &str) -> Self {
        self.push_single(Err(message.to_string()))
    }

    pub(crate) fn on_single(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.single_hook = Some(Box::new(hook));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Extra wait on batch calls only.
    pub(crate) fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub(crate) fn batch_calls(&self) -> Vec<Vec<String>> {
        self.batch_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub(crate) fn single_calls(&self) -> Vec<String> {
        self.single_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn push_single(self, answer: Result<String, String>) -> Self {
        if let Ok(mut singles) = self.singles.lock() {
            singles.push_back(answer);
        }
        self
    }
}

impl NamingOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    fn label_batch(&self, images: &[OracleImage]) -> Result<Vec<LabelResult>, OracleCallError> {
        if let Ok(mut calls) = self.batch_calls.lock() {
            calls.push(images.iter().map(|image| image.filename.clone()).collect());
        }
        thread::sleep(self.delay + self.batch_delay);
        if let Some(message) = &self.batch_error {
            return Err(OracleCallError::Rejected(message.clone()));
        }
        let mut labels: Vec<LabelResult> = images
            .iter()
            .filter_map(|image| {
                self.titles.get(&image.filename).map(|title| LabelResult {
                    original_filename: image.filename.clone(),
                    short_title: title.clone(),
                })
            })
            .collect();
        labels.extend(self.extra_entries.iter().cloned());
        Ok(labels)
    }

    fn label_single(&self, image: &OracleImage) -> Result<SingleLabel, OracleCallError> {
        if let Ok(mut calls) = self.single_calls.lock() {
            calls.push(image.filename.clone());
        }
        thread::sleep(self.delay);
        if let Some(hook) = &self.single_hook {
            hook();
        }
        let next = self
            .singles
            .lock()
            .ok()
            .and_then(|mut singles| singles.pop_front());
        match next {
            Some(Ok(short_title)) => Ok(SingleLabel { short_title }),
            Some(Err(message)) => Err(OracleCallError::Rejected(message)),
            None => Err(OracleCallError::Rejected(
                "no scripted single answer left".to_string(),
            )),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub(crate) fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ProgressEvent::kind).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn publish(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
