use coze_flow::{PageSession, PageState, Toast};
use serde::{Deserialize, Serialize};

/// Body of `POST /coze/upload-file`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileRequest {
    /// Base64 file content.
    pub file: String,
    pub file_name: String,
    pub file_type: String,
}

/// Query of `GET /coze/workflow-result`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResultQuery {
    pub execute_id: String,
}

/// Body of `POST /image-to-prompt/sessions/{id}/generate`. Leaving `file`
/// out is the "nothing selected" case.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub prompt_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub state: PageState,
    pub toasts: Vec<Toast>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<PageSession> for SessionResponse {
    fn from(session: PageSession) -> Self {
        Self {
            session_id: session.id,
            state: session.state,
            toasts: session.toasts,
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
        }
    }
}
