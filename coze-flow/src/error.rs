use thiserror::Error;

pub type Result<T> = std::result::Result<T, CozeError>;

/// Errors raised while talking to Coze or driving a page session.
#[derive(Debug, Error)]
pub enum CozeError {
    /// Network failure or an unreadable HTTP body.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx response or an explicit failure code from the upstream service.
    #[error("Upstream rejection (status {status:?}): {message}{}", detail_suffix(.details))]
    UpstreamRejection {
        status: Option<u16>,
        message: String,
        details: Option<String>,
    },

    /// The response parsed but the expected field was absent.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A generate cycle ended without settling the page.
    #[error("Generate cycle interrupted: {0}")]
    Interrupted(String),

    /// A required input was missing before any network call was made.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),
}

fn detail_suffix(details: &Option<String>) -> String {
    details
        .as_deref()
        .map(|d| format!(" | {d}"))
        .unwrap_or_default()
}

impl CozeError {
    pub fn rejection(status: Option<u16>, message: impl Into<String>) -> Self {
        CozeError::UpstreamRejection {
            status,
            message: message.into(),
            details: None,
        }
    }

    /// Text safe to show an end user. Status codes of the transport and raw
    /// bodies stay in the `Display` form, which only goes to the logs.
    pub fn user_message(&self) -> String {
        match self {
            CozeError::Transport(_) => "网络请求失败，请重试".to_string(),
            CozeError::UpstreamRejection { message, .. } => message.clone(),
            CozeError::ShapeMismatch(_) => "返回数据格式异常，请重试".to_string(),
            CozeError::Interrupted(_) => "生成提示词失败，请重试".to_string(),
            CozeError::Precondition(message) => message.clone(),
            CozeError::Config(_) => "服务配置错误，请联系管理员".to_string(),
            CozeError::SessionNotFound(_) => "页面会话不存在".to_string(),
            CozeError::SessionBusy(_) => "正在生成提示词，请稍候".to_string(),
        }
    }
}

impl From<reqwest::Error> for CozeError {
    fn from(err: reqwest::Error) -> Self {
        CozeError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for CozeError {
    fn from(err: serde_json::Error) -> Self {
        CozeError::ShapeMismatch(err.to_string())
    }
}

impl From<base64::DecodeError> for CozeError {
    fn from(err: base64::DecodeError) -> Self {
        CozeError::Precondition(format!("文件内容不是有效的 base64 编码: {err}"))
    }
}
