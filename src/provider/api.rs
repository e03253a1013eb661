//! 直接从 API 提取代理

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::queue::default_poll_interval_ms;
use super::{CommonOptions, Deadline, Provider, ProviderOptions};
use crate::error::Result;
use crate::http::{self, HttpClient, HttpRequest, HttpResponse};
use crate::lease::Lease;

lazy_static! {
    /// 默认提取规则：IPv4:port
    static ref IP_EXTRACT_RULE: Regex =
        Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}:\d+").expect("valid pattern");
}

/// 提取接口的请求参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: default_method(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// 提取接口地址
    #[serde(alias = "key")]
    pub endpoint: String,
    #[serde(default)]
    pub options: RequestOptions,
    /// 从响应文本中匹配地址的正则
    #[serde(default)]
    pub pattern: Option<String>,
    /// 从 JSON 响应中取地址列表的路径，优先于 pattern
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(flatten)]
    pub common: CommonOptions,
}

impl ApiConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            options: RequestOptions::default(),
            pattern: None,
            json_path: None,
            poll_interval_ms: default_poll_interval_ms(),
            common: CommonOptions::default(),
        }
    }
}

/// 从响应中解析出地址
#[derive(Clone)]
pub enum ResponseParser {
    Pattern(Regex),
    JsonPath(String),
    Custom(Arc<dyn Fn(&HttpResponse) -> Vec<String> + Send + Sync>),
}

impl ResponseParser {
    pub fn parse(&self, response: &HttpResponse) -> Vec<String> {
        match self {
            ResponseParser::Pattern(pattern) => pattern
                .find_iter(&response.text)
                .map(|m| m.as_str().to_string())
                .collect(),
            ResponseParser::JsonPath(path) => {
                let Ok(data) = response.json() else {
                    return Vec::new();
                };
                match http::lookup(&data, path) {
                    Some(Value::Array(items)) => items
                        .iter()
                        .filter_map(|item| match item {
                            Value::String(s) => Some(s.clone()),
                            _ => None,
                        })
                        .collect(),
                    Some(Value::String(s)) => vec![s.clone()],
                    _ => Vec::new(),
                }
            }
            ResponseParser::Custom(parse) => parse(response),
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        ResponseParser::Pattern(IP_EXTRACT_RULE.clone())
    }
}

impl fmt::Debug for ResponseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseParser::Pattern(pattern) => write!(f, "Pattern({})", pattern.as_str()),
            ResponseParser::JsonPath(path) => write!(f, "JsonPath({})", path),
            ResponseParser::Custom(_) => f.write_str("Custom"),
        }
    }
}

pub struct ApiProvider {
    request: HttpRequest,
    parser: ResponseParser,
    poll_interval: Duration,
    http: Arc<dyn HttpClient>,
    container: SegQueue<String>,
    // 串行化提取，避免多个线程同时去请求接口
    lock: Mutex<()>,
    options: ProviderOptions,
}

impl ApiProvider {
    pub fn new(config: ApiConfig, http: Arc<dyn HttpClient>) -> Result<Self> {
        let parser = match (&config.json_path, &config.pattern) {
            (Some(path), _) => ResponseParser::JsonPath(path.clone()),
            (None, Some(pattern)) => ResponseParser::Pattern(Regex::new(pattern)?),
            (None, None) => ResponseParser::default(),
        };

        let mut request = HttpRequest::new(&config.options.method, &config.endpoint);
        request.headers = config.options.headers;
        request.params = config.options.params;
        request.body = config.options.body;

        Ok(Self {
            request,
            parser,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            http,
            container: SegQueue::new(),
            lock: Mutex::new(()),
            options: ProviderOptions::new(config.common),
        })
    }

    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    /// 缓冲区里还没用过的地址数量
    pub fn buffered(&self) -> usize {
        self.container.len()
    }

    /// 请求接口直到解析出至少一个地址，全部放入缓冲区
    pub fn fetch(&self, timeout: Option<Duration>) -> Result<usize> {
        let deadline = Deadline::new(timeout);
        loop {
            match self.http.fetch(&self.request) {
                Ok(response) if response.ok() => {
                    let proxies = self.parser.parse(&response);
                    if !proxies.is_empty() {
                        let count = proxies.len();
                        for proxy in proxies {
                            self.container.push(proxy);
                        }
                        debug!("[提取代理] {} 获取到 {} 个", self.request.url, count);
                        return Ok(count);
                    }
                    warn!("[获取代理失败] 响应中没有代理, ref: {}", self.request.url);
                }
                Ok(response) => {
                    warn!(
                        "[获取代理失败] status: {}, ref: {}",
                        response.status, self.request.url
                    );
                }
                Err(e) => warn!("[获取代理失败] {}, ref: {}", e, self.request.url),
            }
            deadline.wait(self.poll_interval)?;
        }
    }
}

impl Provider for ApiProvider {
    fn options(&self) -> &ProviderOptions {
        &self.options
    }

    fn obtain(&self, timeout: Option<Duration>) -> Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(proxy) = self.container.pop() {
                return Ok(proxy);
            }
            self.fetch(timeout)?;
        }
    }

    /// 把地址放回缓冲区
    fn release(&self, lease: &Lease) -> Result<()> {
        if !lease.raw().is_empty() {
            self.container.push(lease.raw().to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for ApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiProvider")
            .field("key", &self.request.url)
            .field("options", &self.request)
            .field("parser", &self.parser)
            .field("buffered", &self.container.len())
            .finish()
    }
}
