use std::env;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::error::OracleCallError;
use crate::oracle::{
    parse_batch_labels, parse_single_label, LabelResult, NamingOracle, OracleImage, SingleLabel,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const SYSTEM_INSTRUCTION_BATCH: &str =
    "You are an expert file naming assistant. Your only output must be the requested JSON structure.";
const SYSTEM_INSTRUCTION_SINGLE: &str = "You are an expert file naming assistant. Your only output must be a single JSON object with the key 'short_title'.";
const BATCH_PROMPT: &str = "Analyze the following batch of images. For EACH image, you MUST identify its original filename and generate a concise, descriptive, 3-5 word title suitable for renaming. Return the complete structured JSON array containing the 'original_filename' and 'short_title' for every image in the batch. Ensure the 'original_filename' exactly matches one of the filenames provided in the prompts.";
const SINGLE_PROMPT: &str = "Analyze this image and give a concise, descriptive, 3-5 word title. Return only the title in a simple JSON format like: {\"short_title\": \"your title\"}";

/// Naming oracle backed by Gemini `generateContent` with JSON-schema output.
pub struct GeminiOracle {
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiOracle {
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            model: model.into(),
            timeout,
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn generate(&self, payload: &Value) -> Result<String, OracleCallError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(OracleCallError::MissingCredentials(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
            ));
        };
        let endpoint = self.endpoint_for_model(&self.model);
        tracing::debug!(endpoint = %endpoint, "sending gemini request");
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(payload)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    OracleCallError::Timeout(self.timeout)
                } else {
                    OracleCallError::Transport(err)
                }
            })?;
        let body = response_json_or_error(response)?;
        extract_response_text(&body)
    }
}

impl NamingOracle for GeminiOracle {
    fn name(&self) -> &str {
        "gemini"
    }

    fn label_batch(&self, images: &[OracleImage]) -> Result<Vec<LabelResult>, OracleCallError> {
        let text = self.generate(&batch_payload(images))?;
        parse_batch_labels(&text)
    }

    fn label_single(&self, image: &OracleImage) -> Result<SingleLabel, OracleCallError> {
        let text = self.generate(&single_payload(image))?;
        parse_single_label(&text)
    }
}

fn inline_image_part(image: &OracleImage) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": BASE64.encode(&image.bytes),
        }
    })
}

fn batch_payload(images: &[OracleImage]) -> Value {
    let mut parts = vec![json!({ "text": BATCH_PROMPT })];
    for image in images {
        parts.push(inline_image_part(image));
        parts.push(json!({ "text": format!("Image File: {}", image.filename) }));
    }
    json!({
        "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION_BATCH }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "descriptions": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "original_filename": {
                                    "type": "STRING",
                                    "description": "The full original filename (including extension) that this description corresponds to."
                                },
                                "short_title": {
                                    "type": "STRING",
                                    "description": "A concise, descriptive, 3-5 word title for the image content, suitable for a filename."
                                }
                            },
                            "required": ["original_filename", "short_title"]
                        }
                    }
                },
                "required": ["descriptions"]
            }
        }
    })
}

fn single_payload(image: &OracleImage) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION_SINGLE }] },
        "contents": [{
            "role": "user",
            "parts": [inline_image_part(image), { "text": SINGLE_PROMPT }],
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": { "short_title": { "type": "STRING" } },
                "required": ["short_title"]
            }
        }
    })
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, OracleCallError> {
    let status = response.status();
    let body = response.text().map_err(OracleCallError::Transport)?;
    if !status.is_success() {
        return Err(OracleCallError::Status {
            code: status.as_u16(),
            body: truncate_text(&body, 512),
        });
    }
    serde_json::from_str(&body)
        .map_err(|err| OracleCallError::Malformed(format!("response is not JSON: {err}")))
}

/// Concatenates the text parts of the first candidate.
fn extract_response_text(payload: &Value) -> Result<String, OracleCallError> {
    if let Some(reason) = payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(OracleCallError::Rejected(format!("prompt blocked: {reason}")));
    }
    let parts = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("");
    if text.trim().is_empty() {
        let finish = payload
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(OracleCallError::Malformed(format!(
            "no text in response (finishReason: {finish})"
        )));
    }
    Ok(text)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
