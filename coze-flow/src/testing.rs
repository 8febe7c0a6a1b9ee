//! Scripted stand-in for the workflow service, shared by the unit tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    client::CozeApi,
    error::{CozeError, Result},
    state::Generation,
    types::{RetrieveResult, TriggerResult, UploadResult, UploadedFile, WorkflowRequest},
};

type Scripted<T> = Mutex<VecDeque<Result<T>>>;

#[derive(Default)]
pub struct ScriptedApi {
    uploads: Scripted<UploadResult>,
    triggers: Scripted<TriggerResult>,
    polls: Scripted<RetrieveResult>,
    pub upload_calls: AtomicUsize,
    pub trigger_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    /// Bumped when the poll with this (1-based) number is answered.
    cancel_on_poll: Mutex<Option<(usize, Generation)>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_ok(self, body: Value) -> Self {
        self.push_upload(Ok(UploadResult {
            success: true,
            data: body,
        }))
    }

    pub fn push_upload(self, result: Result<UploadResult>) -> Self {
        self.uploads.lock().unwrap().push_back(result);
        self
    }

    pub fn trigger_ok(self, data: Value) -> Self {
        let execute_id = data["execute_id"].as_str().map(str::to_string);
        self.push_trigger(Ok(TriggerResult {
            success: true,
            execute_id,
            data,
        }))
    }

    pub fn push_trigger(self, result: Result<TriggerResult>) -> Self {
        self.triggers.lock().unwrap().push_back(result);
        self
    }

    pub fn poll_ok(self, body: Value) -> Self {
        self.push_poll(Ok(RetrieveResult {
            success: true,
            data: body,
        }))
    }

    pub fn poll_running(self, times: usize) -> Self {
        (0..times).fold(self, |api, _| api.poll_ok(json!({ "status": "running" })))
    }

    pub fn poll_err(self, times: usize) -> Self {
        (0..times).fold(self, |api, _| {
            api.push_poll(Err(CozeError::Transport("connection reset".to_string())))
        })
    }

    pub fn push_poll(self, result: Result<RetrieveResult>) -> Self {
        self.polls.lock().unwrap().push_back(result);
        self
    }

    pub fn cancel_on_poll(self, poll_number: usize, generation: Generation) -> Self {
        *self.cancel_on_poll.lock().unwrap() = Some((poll_number, generation));
        self
    }

    pub fn network_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
            + self.trigger_calls.load(Ordering::SeqCst)
            + self.poll_calls.load(Ordering::SeqCst)
    }
}

fn next<T>(queue: &Scripted<T>, what: &str) -> Result<T> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(CozeError::Transport(format!("no scripted {what} response"))))
}

#[async_trait]
impl CozeApi for ScriptedApi {
    async fn upload_file(&self, _file: &UploadedFile) -> Result<UploadResult> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.uploads, "upload")
    }

    async fn generate_prompt(&self, request: &WorkflowRequest) -> Result<TriggerResult> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        request.workflow_parameters()?;
        next(&self.triggers, "trigger")
    }

    async fn get_result(&self, _execute_id: &str) -> Result<RetrieveResult> {
        let number = self.poll_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, generation)) = self.cancel_on_poll.lock().unwrap().as_ref() {
            if *at == number {
                generation.bump();
            }
        }
        next(&self.polls, "poll")
    }
}
