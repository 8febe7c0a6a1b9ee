use async_trait::async_trait;
use reqwest::{
    Client, StatusCode,
    multipart::{Form, Part},
};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::{
    config::CozeConfig,
    error::{CozeError, Result},
    types::{
        RetrieveResult, TriggerResult, UploadResult, UploadedFile, WorkflowRequest,
        WorkflowResponse, non_empty_str,
    },
};

const UPLOAD_PATH: &str = "/v1/files/upload";
const RUN_PATH: &str = "/v1/workflow/run";
const RETRIEVE_PATH: &str = "/v1/workflow/run/retrieve";

/// The three calls the page controller makes against the workflow service.
#[async_trait]
pub trait CozeApi: Send + Sync {
    async fn upload_file(&self, file: &UploadedFile) -> Result<UploadResult>;

    async fn generate_prompt(&self, request: &WorkflowRequest) -> Result<TriggerResult>;

    async fn get_result(&self, execute_id: &str) -> Result<RetrieveResult>;
}

/// HTTP client for the Coze file and workflow endpoints.
#[derive(Clone)]
pub struct CozeClient {
    client: Client,
    config: CozeConfig,
}

impl CozeClient {
    pub fn new(config: CozeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &CozeConfig {
        &self.config
    }

    fn workflow_not_found_hint(&self, message: String) -> String {
        if message.contains("Workflow not found") {
            format!(
                "{message}. 请检查工作流ID ({}) 是否正确，以及工作流是否已发布。",
                self.config.workflow_id
            )
        } else {
            message
        }
    }
}

#[async_trait]
impl CozeApi for CozeClient {
    async fn upload_file(&self, file: &UploadedFile) -> Result<UploadResult> {
        let url = self.config.endpoint(UPLOAD_PATH);
        info!(
            file_name = %file.file_name,
            mime_type = %file.mime_type,
            size = file.bytes.len(),
            token_present = !self.config.api_token.is_empty(),
            "Uploading file to Coze"
        );

        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime_type)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let details = pretty_body(&body);
            error!(status = status.as_u16(), body = %details, "Coze file upload rejected");
            return Err(CozeError::UpstreamRejection {
                status: Some(status.as_u16()),
                message: upload_failure_message(status),
                details: Some(details),
            });
        }

        let data: Value = response.json().await?;
        debug!(response = %data, "Coze file upload succeeded");

        Ok(UploadResult {
            success: true,
            data,
        })
    }

    async fn generate_prompt(&self, request: &WorkflowRequest) -> Result<TriggerResult> {
        let parameters = request.workflow_parameters()?;
        let body = json!({
            "workflow_id": self.config.workflow_id,
            "parameters": parameters,
        });

        let url = self.config.endpoint(RUN_PATH);
        info!(workflow_id = %self.config.workflow_id, "Triggering Coze workflow");
        debug!(request = %body, "Workflow run request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %text, "Coze workflow run rejected");
            let message = self.workflow_not_found_hint(format!(
                "工作流API返回错误: {}",
                run_error_text(&text)
            ));
            return Err(CozeError::UpstreamRejection {
                status: Some(status.as_u16()),
                message,
                details: Some(text),
            });
        }

        let result: Value = response.json().await?;
        debug!(response = %result, "Workflow run response");

        match WorkflowResponse::classify(result) {
            WorkflowResponse::Success { data } => Ok(TriggerResult {
                success: true,
                execute_id: first_string(&data, &["execute_id", "id"]),
                data,
            }),
            WorkflowResponse::Failure { msg, detail } => {
                let mut message = msg.unwrap_or_else(|| "未知错误".to_string());
                if let Some(detail) = &detail {
                    message.push_str(&format!(" (详情: {detail})"));
                }
                error!(message = %message, "Coze workflow reported failure");
                Err(CozeError::rejection(
                    None,
                    self.workflow_not_found_hint(format!("工作流执行失败: {message}")),
                ))
            }
            WorkflowResponse::Unknown(body) => {
                // Accepted as success; the body becomes the payload.
                warn!(response = %body, "Unexpected workflow run response format");
                Ok(TriggerResult {
                    success: true,
                    execute_id: first_string(&body, &["execute_id", "id"]),
                    data: body,
                })
            }
        }
    }

    async fn get_result(&self, execute_id: &str) -> Result<RetrieveResult> {
        let url = format!(
            "{}?execute_id={}",
            self.config.endpoint(RETRIEVE_PATH),
            urlencoding::encode(execute_id)
        );
        debug!(execute_id, "Querying Coze workflow result");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(execute_id, status = status.as_u16(), body = %text, "Workflow result query rejected");
            return Err(CozeError::UpstreamRejection {
                status: Some(status.as_u16()),
                message: format!("获取工作流结果失败: {}", status.as_u16()),
                details: Some(text),
            });
        }

        let data: Value = response.json().await?;
        Ok(RetrieveResult {
            success: true,
            data,
        })
    }
}

fn upload_failure_message(status: StatusCode) -> String {
    match status {
        StatusCode::UNAUTHORIZED => "认证失败 (401): API Token 可能无效或已过期".to_string(),
        StatusCode::FORBIDDEN => "权限不足 (403): 没有文件上传权限".to_string(),
        StatusCode::BAD_REQUEST => "请求参数错误 (400): 请检查文件格式和大小".to_string(),
        other => format!("文件上传失败 ({})", other.as_u16()),
    }
}

/// Pretty-print a JSON error body, or keep the raw text.
fn pretty_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or_else(|| body.to_string())
}

/// `error_message`, then `message`, then `msg`, then the raw text.
fn run_error_text(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| first_string(&json, &["error_message", "message", "msg"]))
        .unwrap_or_else(|| body.to_string())
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| non_empty_str(&value[*key]))
        .map(str::to_string)
}
