//! Scripted invoker for tests
//!
//! Routes responses by label prefix so interleaved calls (competitors,
//! judge, reviewers) stay deterministic regardless of completion order.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::types::{LlmError, LlmInvoker, LlmRequest, LlmResponse};

/// In-process mock of the LLM CLI
pub struct MockInvoker {
    routes: Mutex<Vec<(String, VecDeque<LlmResponse>)>>,
    fallback: LlmResponse,
    calls: Mutex<Vec<String>>,
}

impl MockInvoker {
    /// Mock that answers every call with an empty success
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            fallback: LlmResponse {
                success: true,
                result: String::new(),
                structured: None,
                cost: 0.0,
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replace the response used when no route matches
    pub fn with_fallback(mut self, fallback: LlmResponse) -> Self {
        self.fallback = fallback;
        self
    }

    /// Queue a response for labels starting with `prefix`
    pub fn enqueue(&self, prefix: &str, response: LlmResponse) {
        let mut routes = self.routes.lock().unwrap();
        if let Some((_, queue)) = routes.iter_mut().find(|(p, _)| p == prefix) {
            queue.push_back(response);
        } else {
            routes.push((prefix.to_string(), VecDeque::from([response])));
        }
    }

    /// Labels of every call made so far
    pub fn call_labels(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmInvoker for MockInvoker {
    async fn invoke(&self, label: &str, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.calls.lock().unwrap().push(label.to_string());

        let mut routes = self.routes.lock().unwrap();
        for (prefix, queue) in routes.iter_mut() {
            if label.starts_with(prefix.as_str())
                && let Some(response) = queue.pop_front()
            {
                return Ok(response);
            }
        }
        Ok(self.fallback.clone())
    }
}
