use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    client::CozeApi,
    extract::{ExtractMode, extract_output, find_execute_id},
    poller::{PollFailure, PollOutcome, Poller},
    state::{GenerationToken, Notifier, PageState, Phase, Toast},
    types::{ExtractedPrompt, UploadedFile, WorkflowRequest},
};

pub const MSG_NO_IMAGE: &str = "请先选择一张图片";
pub const MSG_UPLOAD_FAILED: &str = "文件上传失败，请重试";
pub const MSG_NO_FILE_ID: &str = "获取文件ID失败，请重试";
pub const MSG_TRIGGER_FAILED: &str = "工作流调用失败，请重试";
pub const MSG_NO_EXECUTE_ID: &str = "无法获取工作流执行ID，请重试";
pub const MSG_WORKFLOW_FAILED: &str = "工作流执行失败";
pub const MSG_EMPTY_PROMPT: &str = "未能获取生成的提示词，请重试";
pub const MSG_POLL_FAILED: &str = "生成提示词失败，请重试";
pub const MSG_TIMED_OUT: &str = "生成提示词超时，请重试";
pub const MSG_SUCCESS: &str = "提示词生成成功！";

/// How a generate cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement {
    Prompt(ExtractedPrompt),
    Error(String),
    /// Owner went away mid-cycle; nothing is applied or shown.
    Cancelled,
}

/// Drives upload → trigger → inline result or poll → display for one page.
/// The only place that emits toasts or touches page state.
#[derive(Clone)]
pub struct PageController {
    api: Arc<dyn CozeApi>,
    poller: Poller,
}

impl PageController {
    pub fn new(api: Arc<dyn CozeApi>, poller: Poller) -> Self {
        Self { api, poller }
    }

    /// Run one generate cycle and return the updated page state.
    ///
    /// Emits exactly one toast unless the token goes stale, in which case the
    /// incoming state is returned untouched and nothing is emitted.
    pub async fn generate(
        &self,
        state: PageState,
        selection: Option<&UploadedFile>,
        prompt_type: &str,
        token: &GenerationToken,
        notifier: &dyn Notifier,
    ) -> PageState {
        let Some(file) = selection else {
            notifier.notify(Toast::error(MSG_NO_IMAGE));
            return state;
        };

        let (state, settlement) = self.drive(state.begin(), file, prompt_type, token).await;
        settle(state, settlement, notifier)
    }

    async fn drive(
        &self,
        state: PageState,
        file: &UploadedFile,
        prompt_type: &str,
        token: &GenerationToken,
    ) -> (PageState, Settlement) {
        let upload = match self.api.upload_file(file).await {
            Ok(upload) => upload,
            Err(e) => {
                error!(error = %e, file_name = %file.file_name, "File upload failed");
                return (state, Settlement::Error(e.user_message()));
            }
        };
        if token.is_stale() {
            return (state, Settlement::Cancelled);
        }
        if !upload.success {
            return (state, Settlement::Error(MSG_UPLOAD_FAILED.to_string()));
        }
        let Some(file_id) = upload.file_id() else {
            error!(response = %upload.data, "Upload response carries no file id");
            return (state, Settlement::Error(MSG_NO_FILE_ID.to_string()));
        };

        let state = state.enter(Phase::Triggering);
        let request = WorkflowRequest::for_file(file_id, prompt_type);
        let trigger = match self.api.generate_prompt(&request).await {
            Ok(trigger) => trigger,
            Err(e) => {
                error!(error = %e, "Workflow trigger failed");
                return (state, Settlement::Error(e.user_message()));
            }
        };
        if token.is_stale() {
            return (state, Settlement::Cancelled);
        }
        if !trigger.success {
            return (state, Settlement::Error(MSG_TRIGGER_FAILED.to_string()));
        }

        let trigger_value = serde_json::to_value(&trigger).unwrap_or_default();
        if let Some(prompt) = extract_output(&trigger_value, ExtractMode::Trigger) {
            info!("Prompt returned inline, skipping polling");
            return (state, Settlement::Prompt(prompt));
        }

        let Some(handle) = find_execute_id(&trigger_value) else {
            error!(response = %trigger_value, "No execute id in trigger response");
            return (state, Settlement::Error(MSG_NO_EXECUTE_ID.to_string()));
        };

        let state = state.enter(Phase::Polling {
            execute_id: handle.execute_id.clone(),
        });
        let settlement = match self.poller.run(self.api.as_ref(), &handle, token).await {
            PollOutcome::Success(prompt) => Settlement::Prompt(prompt),
            PollOutcome::Failed(PollFailure::Upstream(message))
            | PollOutcome::Failed(PollFailure::Unrecognized(message)) => {
                Settlement::Error(message.unwrap_or_else(|| MSG_WORKFLOW_FAILED.to_string()))
            }
            PollOutcome::Failed(PollFailure::EmptyOutput) => {
                Settlement::Error(MSG_EMPTY_PROMPT.to_string())
            }
            PollOutcome::Failed(PollFailure::Transport(detail)) => {
                warn!(detail = %detail, "Polling stopped after repeated query errors");
                Settlement::Error(MSG_POLL_FAILED.to_string())
            }
            PollOutcome::TimedOut => Settlement::Error(MSG_TIMED_OUT.to_string()),
            PollOutcome::Cancelled => Settlement::Cancelled,
        };
        (state, settlement)
    }
}

/// Apply the terminal outcome: one toast, loading cleared once.
fn settle(mut state: PageState, settlement: Settlement, notifier: &dyn Notifier) -> PageState {
    match settlement {
        Settlement::Cancelled => state,
        Settlement::Prompt(prompt) => {
            state.prompt = prompt.into_string();
            state.is_loading = false;
            state.phase = Phase::Succeeded;
            notifier.notify(Toast::success(MSG_SUCCESS));
            state
        }
        Settlement::Error(message) => {
            state.is_loading = false;
            state.phase = Phase::Failed;
            notifier.notify(Toast::error(message));
            state
        }
    }
}
