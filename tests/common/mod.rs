//! 集成测试共用的 HTTP 替身

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use proxy_lease_pool::{HttpClient, HttpRequest, HttpResponse, PoolError, Result};

/// 按顺序返回预置响应，预置用完后返回 503
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    /// 所有请求都当作传输层错误
    pub offline: bool,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    pub fn push(&self, status: u16, text: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(HttpResponse::new(status, text));
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpClient for ScriptedClient {
    fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if self.offline {
            return Err(PoolError::InvalidResponse {
                reason: "connection refused".to_string(),
            });
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| HttpResponse::new(503, "")))
    }
}
