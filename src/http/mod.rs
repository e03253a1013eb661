//! HTTP 请求封装
//! 代理源只依赖 [`HttpClient`]，默认实现基于 reqwest 的阻塞客户端

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::error::{PoolError, Result};

/// 一次 HTTP 请求
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.to_uppercase(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn with_param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    /// JSON 请求体，同时补上 Content-Type
    pub fn with_json(mut self, body: Value) -> Self {
        self.headers
            .entry("Content-Type".to_string())
            .or_insert_with(|| "application/json".to_string());
        self.body = Some(body);
        self
    }
}

/// HTTP 响应
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub text: String,
}

impl HttpResponse {
    pub fn new(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }

    /// 2xx
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.text).map_err(|e| PoolError::InvalidResponse {
            reason: format!("不是合法的 JSON: {}", e),
        })
    }

    /// 按点号路径取值，如 `proxies.GLOBAL.now`
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let data = self.json().ok()?;
        lookup(&data, path).cloned()
    }
}

/// 在 JSON 中按点号路径取值，数组下标用数字
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(data, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// HTTP 客户端
///
/// 非 2xx 响应正常返回，由调用方判断 `ok()`；
/// 只有传输层错误才返回 Err。
pub trait HttpClient: Send + Sync + fmt::Debug {
    fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// 基于 reqwest 阻塞客户端的实现
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl HttpClient for ReqwestClient {
    fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            PoolError::InvalidResponse {
                reason: format!("无效的请求方法 {}: {}", request.method, e),
            }
        })?;

        let mut builder = self.client.request(method, &request.url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let text = response.text()?;
        Ok(HttpResponse { status, text })
    }
}

/// 无法创建真实客户端时的占位实现，所有请求都返回错误
#[derive(Debug, Clone)]
pub struct UnavailableClient {
    reason: String,
}

impl UnavailableClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl HttpClient for UnavailableClient {
    fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
        Err(PoolError::InvalidResponse {
            reason: format!("HTTP 客户端不可用 ({}): {} {}", self.reason, request.method, request.url),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_dotted_path() {
        let response = HttpResponse::new(
            200,
            r#"{"proxies":{"GLOBAL":{"now":"B","all":["A","B","C"]}}}"#,
        );
        assert_eq!(response.lookup("proxies.GLOBAL.now"), Some(json!("B")));
        assert_eq!(response.lookup("proxies.GLOBAL.all.2"), Some(json!("C")));
        assert_eq!(response.lookup("proxies.missing"), None);
    }

    #[test]
    fn test_status_ok_range() {
        assert!(HttpResponse::new(204, "").ok());
        assert!(!HttpResponse::new(404, "").ok());
        assert!(!HttpResponse::new(500, "").ok());
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = HttpRequest::new("put", "http://x").with_json(json!({"name": "A"}));
        assert_eq!(request.method, "PUT");
        assert_eq!(
            request.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_unavailable_client_fails_every_request() {
        let client = UnavailableClient::new("tls backend");
        let err = client
            .fetch(&HttpRequest::new("GET", "http://127.0.0.1:9090/configs"))
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidResponse { reason } if reason.contains("tls backend")));
    }
}
