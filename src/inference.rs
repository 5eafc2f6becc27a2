use crate::model_service::VisionModel;
use crate::preprocess::PreprocessedImage;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

pub const PROMPT: &str = r#"
You are an object and scene understanding system.
Return only a JSON response in the format:
{
  "objects": ["object1", "object2", ...],
  "scenario": "Short description of what is happening"
}
"#;

pub const MAX_OBJECTS: usize = 32;
pub const MAX_TEXT_CHARS: usize = 200;
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum InferenceStatus {
    #[default]
    Ok,
    ParseError,
    CallError(String),
}

impl InferenceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            InferenceStatus::Ok => "ok",
            InferenceStatus::ParseError => "parse_error",
            InferenceStatus::CallError(_) => "call_error",
        }
    }
}

/// Objects and caption reported by the model for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InferenceResult {
    pub objects: Vec<String>,
    pub scenario: String,
    pub status: InferenceStatus,
}

impl InferenceResult {
    pub fn new(objects: Vec<String>, scenario: impl Into<String>) -> Self {
        Self {
            objects,
            scenario: scenario.into(),
            status: InferenceStatus::Ok,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse_error() -> Self {
        Self {
            status: InferenceStatus::ParseError,
            ..Self::default()
        }
    }

    pub fn call_error(message: impl Into<String>) -> Self {
        Self {
            status: InferenceStatus::CallError(message.into()),
            ..Self::default()
        }
    }

    /// Turns the raw model text into a result.
    ///
    /// Missing or empty text is an empty, successful result. Text that is not a
    /// JSON object is a parse error. Within the object, `objects` entries that
    /// are strings, numbers or booleans become labels and anything else is
    /// dropped. A `scenario` that is not a string reads as empty.
    pub fn from_response_text(text: Option<&str>) -> Self {
        let text = match text.map(str::trim) {
            Some(text) if !text.is_empty() => strip_code_fence(text),
            _ => return Self::empty(),
        };

        if text.len() > MAX_RESPONSE_BYTES {
            tracing::warn!(bytes = text.len(), "Model response too large");
            return Self::parse_error();
        }

        let map = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                tracing::warn!("Model response is not a JSON object: {}", other);
                return Self::parse_error();
            }
            Err(e) => {
                tracing::warn!("Failed to parse model response: {}", e);
                return Self::parse_error();
            }
        };

        let objects = match map.get("objects") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(object_label)
                .take(MAX_OBJECTS)
                .collect(),
            _ => Vec::new(),
        };

        let scenario = map
            .get("scenario")
            .and_then(Value::as_str)
            .map(|s| truncate(s.trim()))
            .unwrap_or_default();

        Self::new(objects, scenario)
    }
}

fn object_label(value: &Value) -> Option<String> {
    let label = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!label.is_empty()).then(|| truncate(&label))
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_TEXT_CHARS).collect()
}

// Some models wrap JSON in a markdown fence even when asked not to. Any
// language tag on the opening line is dropped.
fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = match inner.split_once('\n') {
        Some((tag, rest)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => rest,
        _ => inner,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Wraps one remote call with a fixed prompt and folds every failure into an
/// [`InferenceResult`].
pub struct InferenceClient<M: VisionModel> {
    model: M,
}

impl<M: VisionModel> InferenceClient<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub async fn infer(&self, image: &PreprocessedImage) -> InferenceResult {
        match self.model.generate(image, PROMPT).await {
            Ok(text) => {
                let result = InferenceResult::from_response_text(text.as_deref());
                tracing::debug!(
                    objects = result.objects.len(),
                    status = result.status.label(),
                    "Inference finished"
                );
                result
            }
            Err(e) => {
                tracing::error!("Inference call failed: {}", e);
                InferenceResult::call_error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ChannelOrder, Frame};
    use crate::model_service::{CannedModel, ModelServiceError};
    use crate::preprocess::preprocess;
    use async_trait::async_trait;
    use image::RgbImage;

    struct FailingModel;

    #[async_trait]
    impl VisionModel for FailingModel {
        async fn generate(
            &self,
            _image: &PreprocessedImage,
            _prompt: &str,
        ) -> Result<Option<String>, ModelServiceError> {
            Err(ModelServiceError::InvalidResponse(
                "connection reset by peer".into(),
            ))
        }
    }

    fn image() -> PreprocessedImage {
        preprocess(&Frame::new(RgbImage::new(8, 6), ChannelOrder::Rgb), 8)
    }

    #[tokio::test]
    async fn test_infer_parses_objects_and_scenario() {
        let client = InferenceClient::new(CannedModel::new(
            r#"{"objects":["cup","phone"],"scenario":"person at desk"}"#,
        ));
        let result = client.infer(&image()).await;

        assert_eq!(result.objects, vec!["cup", "phone"]);
        assert_eq!(result.scenario, "person at desk");
        assert_eq!(result.status, InferenceStatus::Ok);
    }

    #[tokio::test]
    async fn test_infer_flags_non_json() {
        let client = InferenceClient::new(CannedModel::new("not json"));
        let result = client.infer(&image()).await;

        assert_eq!(result.status, InferenceStatus::ParseError);
        assert!(result.objects.is_empty());
        assert_eq!(result.scenario, "");
    }

    #[tokio::test]
    async fn test_infer_reports_call_errors() {
        let result = InferenceClient::new(FailingModel).infer(&image()).await;

        match result.status {
            InferenceStatus::CallError(message) => {
                assert!(message.contains("connection reset by peer"))
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert!(result.objects.is_empty());
        assert_eq!(result.scenario, "");
    }

    #[tokio::test]
    async fn test_infer_without_text_is_empty_success() {
        let result = InferenceClient::new(CannedModel::silent())
            .infer(&image())
            .await;

        assert_eq!(result, InferenceResult::empty());
    }

    #[test]
    fn test_missing_keys_default_to_empty() {
        let result = InferenceResult::from_response_text(Some(r#"{"scenario":"kitchen"}"#));
        assert!(result.objects.is_empty());
        assert_eq!(result.scenario, "kitchen");

        let result = InferenceResult::from_response_text(Some("{}"));
        assert_eq!(result, InferenceResult::empty());
    }

    #[test]
    fn test_whitespace_text_is_empty_success() {
        assert_eq!(
            InferenceResult::from_response_text(Some("  \n ")),
            InferenceResult::empty()
        );
    }

    #[test]
    fn test_non_object_json_is_parse_error() {
        let result = InferenceResult::from_response_text(Some(r#"["cup"]"#));
        assert_eq!(result.status, InferenceStatus::ParseError);
    }

    #[test]
    fn test_object_entries_are_coerced_or_dropped() {
        let text = r#"{"objects":["  mug ", 3, true, null, {"a":1}, ["b"], ""],"scenario":42}"#;
        let result = InferenceResult::from_response_text(Some(text));

        assert_eq!(result.objects, vec!["mug", "3", "true"]);
        assert_eq!(result.scenario, "");
        assert_eq!(result.status, InferenceStatus::Ok);
    }

    #[test]
    fn test_objects_and_text_are_bounded() {
        let names: Vec<String> = (0..50).map(|i| format!("\"obj{}\"", i)).collect();
        let long = "x".repeat(500);
        let text = format!(
            r#"{{"objects":[{}],"scenario":"{}"}}"#,
            names.join(","),
            long
        );
        let result = InferenceResult::from_response_text(Some(&text));

        assert_eq!(result.objects.len(), MAX_OBJECTS);
        assert_eq!(result.objects[0], "obj0");
        assert_eq!(result.scenario.chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn test_fenced_json_is_accepted() {
        let text = "```json\n{\"objects\":[\"lamp\"],\"scenario\":\"night\"}\n```";
        let result = InferenceResult::from_response_text(Some(text));

        assert_eq!(result.objects, vec!["lamp"]);
        assert_eq!(result.scenario, "night");
    }

    #[test]
    fn test_fence_tag_is_ignored_whatever_its_case() {
        for tag in ["JSON", "Json", "", "jsonc"] {
            let text = format!("```{}\n{{\"objects\":[\"cup\"]}}\n```", tag);
            let result = InferenceResult::from_response_text(Some(&text));

            assert_eq!(result.status, InferenceStatus::Ok, "tag {:?}", tag);
            assert_eq!(result.objects, vec!["cup"]);
        }

        let inline = InferenceResult::from_response_text(Some(r#"```{"scenario":"desk"}```"#));
        assert_eq!(inline.scenario, "desk");
    }

    #[test]
    fn test_oversized_response_is_parse_error() {
        let text = format!(r#"{{"scenario":"{}"}}"#, "y".repeat(MAX_RESPONSE_BYTES));
        let result = InferenceResult::from_response_text(Some(&text));
        assert_eq!(result.status, InferenceStatus::ParseError);
    }
}
