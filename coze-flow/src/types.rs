use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{CozeError, Result};

pub const DEFAULT_USER_QUERY: &str = "请为这张图片生成详细的提示词";
pub const DEFAULT_PROMPT_TYPE: &str = "midjourney";

/// Upstream code for a successful workflow run.
pub const CODE_SUCCESS: i64 = 0;
/// Upstream code for an explicit workflow failure.
pub const CODE_WORKFLOW_FAILED: i64 = 4000;

/// A file picked by the user, ready to be sent to the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

impl UploadedFile {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Decode the base64 transport form. A `data:<mime>;base64,` prefix is
    /// stripped if present.
    pub fn from_base64(
        encoded: &str,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Result<Self> {
        let payload = match encoded.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => encoded,
        };
        let bytes = STANDARD.decode(payload.trim())?;
        Ok(Self::new(bytes, file_name, mime_type))
    }
}

/// Result of an upload call; `data` is the raw upstream body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    pub data: Value,
}

impl UploadResult {
    /// The upstream file id, taken from `data.data.id` or `data.id`.
    pub fn file_id(&self) -> Option<String> {
        [&self.data["data"]["id"], &self.data["id"]]
            .into_iter()
            .find_map(|candidate| non_empty_str(candidate))
            .map(str::to_string)
    }
}

/// Optional knobs of a workflow run, as sent by the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_type: Option<String>,
    /// Older pages send the prompt style as `model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    #[serde(default)]
    pub file_id: Option<String>,
    /// Accepted for compatibility; the workflow resolves the image by file id.
    #[serde(default)]
    pub file_url: String,
    #[serde(default)]
    pub parameters: PromptParameters,
}

impl WorkflowRequest {
    pub fn for_file(file_id: impl Into<String>, prompt_type: impl Into<String>) -> Self {
        Self {
            file_id: Some(file_id.into()),
            file_url: String::new(),
            parameters: PromptParameters {
                user_query: Some(DEFAULT_USER_QUERY.to_string()),
                prompt_type: Some(prompt_type.into()),
                model: None,
            },
        }
    }

    /// Build the `parameters` object of the run envelope. Fails without a file id.
    pub fn workflow_parameters(&self) -> Result<Value> {
        let file_id = self
            .file_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| CozeError::Precondition("缺少图片文件ID".to_string()))?;

        let user_query = self
            .parameters
            .user_query
            .as_deref()
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_USER_QUERY);

        let prompt_type = self
            .parameters
            .prompt_type
            .as_deref()
            .filter(|p| !p.is_empty())
            .or_else(|| self.parameters.model.as_deref().filter(|m| !m.is_empty()))
            .unwrap_or(DEFAULT_PROMPT_TYPE);

        Ok(json!({
            "userQuery": user_query,
            "img": { "type": "file", "file_id": file_id },
            "promptType": prompt_type,
        }))
    }
}

/// The loosely typed envelope returned by the workflow run endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowResponse {
    /// `code == 0` with a present, truthy `data`.
    Success { data: Value },
    /// `code == 4000`.
    Failure { msg: Option<String>, detail: Option<Value> },
    /// Anything else. Treated as success with the whole body as payload.
    Unknown(Value),
}

impl WorkflowResponse {
    pub fn classify(body: Value) -> Self {
        match body.get("code").and_then(Value::as_i64) {
            Some(CODE_SUCCESS) if body.get("data").is_some_and(is_truthy) => {
                let data = body.get("data").cloned().unwrap_or(Value::Null);
                WorkflowResponse::Success { data }
            }
            Some(CODE_WORKFLOW_FAILED) => WorkflowResponse::Failure {
                msg: non_empty_str(&body["msg"]).map(str::to_string),
                detail: body.get("detail").filter(|d| is_truthy(d)).cloned(),
            },
            _ => WorkflowResponse::Unknown(body),
        }
    }
}

/// What the trigger call hands back to the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_id: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub execute_id: String,
}

impl ExecutionHandle {
    pub fn new(execute_id: impl Into<String>) -> Self {
        Self {
            execute_id: execute_id.into(),
        }
    }
}

/// What the status query hands back; `data` is the raw upstream body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResult {
    pub success: bool,
    pub data: Value,
}

/// Final user-visible artifact: trimmed, unescaped and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPrompt {
    text: String,
}

impl ExtractedPrompt {
    pub fn new(text: impl AsRef<str>) -> Option<Self> {
        let trimmed = text.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self {
                text: trimmed.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// JavaScript-style truthiness, which is how the upstream envelope is probed.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub(crate) fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_prefers_nested_data() {
        let result = UploadResult {
            success: true,
            data: json!({ "code": 0, "data": { "id": "f1" }, "id": "outer" }),
        };
        assert_eq!(result.file_id().as_deref(), Some("f1"));
    }

    #[test]
    fn file_id_falls_back_to_top_level() {
        let result = UploadResult {
            success: true,
            data: json!({ "id": "f2", "bytes": 12 }),
        };
        assert_eq!(result.file_id().as_deref(), Some("f2"));
    }

    #[test]
    fn non_string_file_id_is_ignored() {
        let result = UploadResult {
            success: true,
            data: json!({ "data": { "id": 42 } }),
        };
        assert_eq!(result.file_id(), None);
    }

    #[test]
    fn decodes_data_url_payloads() {
        let file = UploadedFile::from_base64("data:image/png;base64,aGVsbG8=", "a.png", "image/png")
            .unwrap();
        assert_eq!(file.bytes, b"hello");
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = UploadedFile::from_base64("@@not base64@@", "a.png", "image/png").unwrap_err();
        assert!(matches!(err, CozeError::Precondition(_)));
    }

    #[test]
    fn parameters_apply_defaults() {
        let request = WorkflowRequest {
            file_id: Some("f1".to_string()),
            ..Default::default()
        };
        let params = request.workflow_parameters().unwrap();
        assert_eq!(params["userQuery"], DEFAULT_USER_QUERY);
        assert_eq!(params["promptType"], "midjourney");
        assert_eq!(params["img"], json!({ "type": "file", "file_id": "f1" }));
    }

    #[test]
    fn model_is_an_alias_for_prompt_type() {
        let request = WorkflowRequest {
            file_id: Some("f1".to_string()),
            parameters: PromptParameters {
                model: Some("stable-diffusion".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let params = request.workflow_parameters().unwrap();
        assert_eq!(params["promptType"], "stable-diffusion");
    }

    #[test]
    fn parameters_require_a_file_id() {
        let request = WorkflowRequest {
            file_id: Some("  ".to_string()),
            ..Default::default()
        };
        let err = request.workflow_parameters().unwrap_err();
        assert_eq!(err.user_message(), "缺少图片文件ID");
    }

    #[test]
    fn classifies_the_three_envelopes() {
        assert_eq!(
            WorkflowResponse::classify(json!({ "code": 0, "data": { "output": "a cat" } })),
            WorkflowResponse::Success {
                data: json!({ "output": "a cat" })
            }
        );
        assert_eq!(
            WorkflowResponse::classify(json!({ "code": 4000, "msg": "bad input" })),
            WorkflowResponse::Failure {
                msg: Some("bad input".to_string()),
                detail: None
            }
        );
        let odd = json!({ "execute_id": "e9" });
        assert_eq!(
            WorkflowResponse::classify(odd.clone()),
            WorkflowResponse::Unknown(odd)
        );
    }

    #[test]
    fn success_code_without_data_is_unknown() {
        let body = json!({ "code": 0, "data": "" });
        assert!(matches!(
            WorkflowResponse::classify(body),
            WorkflowResponse::Unknown(_)
        ));
    }

    #[test]
    fn extracted_prompt_is_trimmed_and_non_empty() {
        assert!(ExtractedPrompt::new("   ").is_none());
        assert_eq!(ExtractedPrompt::new("  a cat \n").unwrap().as_str(), "a cat");
    }
}
