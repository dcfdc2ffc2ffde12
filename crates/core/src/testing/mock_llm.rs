//! Mock LLM client for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::classifier::{CompletionRequest, CompletionResponse, LlmClient, LlmError, LlmUsage};

/// Mock implementation of the LlmClient trait.
///
/// Responses and errors are queued and consumed in order. When the queue
/// is empty the default response is returned (an empty shipment). Every
/// request is recorded for assertions.
pub struct MockLlmClient {
    queue: Mutex<VecDeque<Result<String, LlmError>>>,
    default_response: Mutex<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default_response: Mutex::new("{}".to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Response returned whenever nothing is queued.
    pub fn with_default_response(response: &str) -> Self {
        let client = Self::new();
        *client.default_response.lock().unwrap() = response.to_string();
        client
    }

    pub fn push_response(&self, text: &str) {
        self.queue.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn push_error(&self, error: LlmError) {
        self.queue.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let next = self.queue.lock().unwrap().pop_front();
        let text = match next {
            Some(result) => result?,
            None => self.default_response.lock().unwrap().clone(),
        };
        Ok(CompletionResponse {
            text,
            usage: LlmUsage {
                input_tokens: 200,
                output_tokens: 100,
            },
            model: "mock-model".to_string(),
        })
    }
}
