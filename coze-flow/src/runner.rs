//! PromptRunner: claims a page session, runs exactly **one** generate cycle
//! through the [`PageController`], and persists the resulting page state.
//!
//! The claim marks the session as loading, so a second request for the same
//! page is refused until the first cycle settles. The cycle runs on its own
//! task: a caller that stops waiting does not strand the claim, the page
//! still settles. If the page is deleted while the cycle is in flight, the
//! outcome is dropped instead of saved.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::{
    controller::PageController,
    error::{CozeError, Result},
    state::ToastLog,
    storage::{PageSession, SessionStorage},
    types::UploadedFile,
};

/// High-level helper for the _claim → generate → save_ pattern.
#[derive(Clone)]
pub struct PromptRunner {
    controller: PageController,
    storage: Arc<dyn SessionStorage>,
}

impl PromptRunner {
    pub fn new(controller: PageController, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            controller,
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    /// Run one generate cycle for `session_id` and return the saved session.
    pub async fn generate(
        &self,
        session_id: &str,
        selection: Option<UploadedFile>,
        prompt_type: &str,
    ) -> Result<PageSession> {
        // 1. Claim the page; refuses overlapping cycles
        let session = self.storage.begin_cycle(session_id).await?;
        info!(session_id, prompt_type, "Starting generate cycle");

        // 2. Run the cycle detached from this future
        let runner = self.clone();
        let prompt_type = prompt_type.to_string();
        let cycle =
            tokio::spawn(async move { runner.run_cycle(session, selection, &prompt_type).await });

        match cycle.await {
            Ok(result) => result,
            Err(e) => {
                error!(session_id, "Generate cycle aborted: {}", e);
                self.storage.release_cycle(session_id).await?;
                Err(CozeError::Interrupted(e.to_string()))
            }
        }
    }

    async fn run_cycle(
        &self,
        mut session: PageSession,
        selection: Option<UploadedFile>,
        prompt_type: &str,
    ) -> Result<PageSession> {
        let token = session.generation.token();
        let toasts = ToastLog::new();
        let state = self
            .controller
            .generate(
                session.state.clone(),
                selection.as_ref(),
                prompt_type,
                &token,
                &toasts,
            )
            .await;

        if token.is_stale() {
            debug!(session_id = %session.id, "Page left during generate cycle, discarding outcome");
            return Err(CozeError::SessionNotFound(session.id));
        }

        // 3. Persist so the next read sees the settled page
        session.state = state;
        session.toasts.extend(toasts.take());
        session.updated_at = Utc::now();
        self.storage.finish_cycle(session.clone(), &token).await?;

        Ok(session)
    }
}
