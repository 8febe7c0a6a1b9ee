pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod extract;
pub mod poller;
pub mod runner;
pub mod state;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use client::{CozeApi, CozeClient};
pub use config::CozeConfig;
pub use controller::PageController;
pub use error::{CozeError, Result};
pub use extract::{ExtractMode, PollReading, extract_output, find_execute_id, read_poll_response};
pub use poller::{PollFailure, PollOutcome, PollState, Poller};
pub use runner::PromptRunner;
pub use state::{
    Generation, GenerationToken, Notifier, PageState, Phase, Toast, ToastLog, ToastVariant,
};
pub use storage::{InMemorySessionStorage, PageSession, SessionStorage};
pub use types::{
    ExecutionHandle, ExtractedPrompt, PromptParameters, RetrieveResult, TriggerResult,
    UploadResult, UploadedFile, WorkflowRequest, WorkflowResponse,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn end_to_end_through_the_runner() {
        let api = testing::ScriptedApi::new()
            .upload_ok(json!({ "code": 0, "data": { "id": "file-9" } }))
            .trigger_ok(json!({ "execute_id": "exec-9" }))
            .poll_running(3)
            .poll_ok(json!({
                "code": 0,
                "data": [{ "output": "{\"output\":\"neon city at night,\\ncinematic\"}" }]
            }));

        let config = CozeConfig::new("token", "wf").with_polling(Duration::from_millis(500), 10);
        let controller = PageController::new(Arc::new(api), Poller::from_config(&config));
        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = PromptRunner::new(controller, storage.clone());

        let session = PageSession::new();
        let id = session.id.clone();
        storage.save(session).await.unwrap();

        let image = UploadedFile::from_base64("aGVsbG8=", "city.png", "image/png").unwrap();
        let page = runner.generate(&id, Some(image), "flux").await.unwrap();

        assert_eq!(page.state.prompt, "neon city at night,\ncinematic");
        assert_eq!(page.state.phase, Phase::Succeeded);
        assert_eq!(page.toasts.len(), 1);
    }
}
