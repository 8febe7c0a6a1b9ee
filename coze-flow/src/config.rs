use std::time::Duration;

use crate::error::{CozeError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.coze.cn";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Process-level Coze settings. Callers of the client never pass credentials
/// or the workflow id themselves.
#[derive(Debug, Clone)]
pub struct CozeConfig {
    pub base_url: String,
    pub api_token: String,
    pub workflow_id: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl CozeConfig {
    pub fn new(api_token: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: api_token.into(),
            workflow_id: workflow_id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Read `COZE_API_TOKEN`, `COZE_WORKFLOW_ID` and the optional
    /// `COZE_API_BASE_URL`, `COZE_POLL_INTERVAL_MS`, `COZE_POLL_MAX_ATTEMPTS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CozeConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_token = required_var(&lookup, "COZE_API_TOKEN")?;
        let workflow_id = required_var(&lookup, "COZE_WORKFLOW_ID")?;

        let mut config = Self::new(api_token, workflow_id);

        if let Some(base_url) = lookup("COZE_API_BASE_URL") {
            config = config.with_base_url(base_url);
        }
        if let Some(raw) = lookup("COZE_POLL_INTERVAL_MS") {
            let millis = raw.parse::<u64>().map_err(|_| {
                CozeError::Config(format!("COZE_POLL_INTERVAL_MS is not a number: {raw}"))
            })?;
            config.poll_interval = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup("COZE_POLL_MAX_ATTEMPTS") {
            let attempts = raw.parse::<u32>().map_err(|_| {
                CozeError::Config(format!("COZE_POLL_MAX_ATTEMPTS is not a number: {raw}"))
            })?;
            if attempts == 0 {
                return Err(CozeError::Config(
                    "COZE_POLL_MAX_ATTEMPTS must be at least 1".to_string(),
                ));
            }
            config.max_attempts = attempts;
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_attempts = max_attempts;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn required_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(CozeError::Config(format!(
            "{name} environment variable is required"
        ))),
    }
}
