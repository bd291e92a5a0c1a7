//! In-memory fakes for the model seam (testing only).
//!
//! Provides `FnVlmClient`, which answers every request through a closure and
//! records what it was asked, without any network access.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{VlmClient, VlmRequest};
use crate::domain::{AgentActions, RequestError};

type Responder = dyn Fn(&VlmRequest) -> Result<String, RequestError> + Send + Sync;

/// Closure-driven [`VlmClient`].
pub struct FnVlmClient {
    respond: Box<Responder>,
    calls: Mutex<Vec<VlmRequest>>,
}

impl FnVlmClient {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&VlmRequest) -> Result<String, RequestError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with the same well-formed answer.
    pub fn answering(actions: AgentActions) -> Self {
        let reply = answer_json(actions);
        Self::new(move |_req| Ok(reply.clone()))
    }

    /// Every request seen so far, in call order.
    pub fn calls(&self) -> Vec<VlmRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// `(trajectory, pair)` of every request seen so far.
    pub fn requested_pairs(&self) -> Vec<(u32, usize)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.trajectory, r.pair_index))
            .collect()
    }
}

#[async_trait]
impl VlmClient for FnVlmClient {
    async fn complete(&self, request: &VlmRequest) -> Result<String, RequestError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.respond)(request)
    }
}

/// Reply text the parser accepts for `actions`.
pub fn answer_json(actions: AgentActions) -> String {
    serde_json::json!({ "Answer": actions }).to_string()
}
