//! Vision-language model client seam.
//!
//! The grader talks to the model only through [`VlmClient`], so tests can
//! swap in [`crate::fakes::FnVlmClient`] and the CLI can point at any
//! OpenAI-compatible endpoint.

pub mod openai;

use async_trait::async_trait;

use crate::domain::RequestError;

pub use openai::{OpenAiClient, OpenAiConfig};

/// One base64-encoded image attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// `alice/front`, `bob/left`, ...
    pub label: String,
    pub data_base64: String,
}

/// A fully assembled grading request for one waypoint pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlmRequest {
    pub trajectory: u32,
    pub pair_index: usize,
    pub model: String,
    pub prompt: String,
    pub images: Vec<EncodedImage>,
}

#[async_trait]
pub trait VlmClient: Send + Sync {
    /// Send `request` and return the raw text of the model's reply.
    async fn complete(&self, request: &VlmRequest) -> Result<String, RequestError>;
}

/// Client that refuses every request. Backs sessions whose replies come
/// from a results file rather than a live endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineClient;

#[async_trait]
impl VlmClient for OfflineClient {
    async fn complete(&self, request: &VlmRequest) -> Result<String, RequestError> {
        Err(RequestError::transport(format!(
            "offline session cannot grade traj{} pair {}",
            request.trajectory, request.pair_index
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_client_refuses() {
        let request = VlmRequest {
            trajectory: 2,
            pair_index: 1,
            model: "m".into(),
            prompt: String::new(),
            images: vec![],
        };
        let err = OfflineClient.complete(&request).await.unwrap_err();
        assert_eq!(err.status, None);
        assert!(err.message.contains("traj2 pair 1"));
    }
}
