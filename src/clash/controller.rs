//! Clash external-controller 指令执行

use std::fmt;
use std::sync::Arc;

use log::warn;
use url::Url;

use crate::error::{PoolError, Result};
use crate::http::{HttpClient, HttpRequest, HttpResponse};

/// 单条指令的最大尝试次数
pub const MAX_ATTEMPTS: usize = 5;

pub struct Controller {
    base: Url,
    secret: Option<String>,
    http: Arc<dyn HttpClient>,
}

impl Controller {
    /// `address` 可以省略协议，如 `127.0.0.1:9090`
    pub fn new(
        address: &str,
        secret: Option<String>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let address = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let base = Url::parse(&address).map_err(|e| PoolError::InvalidResponse {
            reason: format!("无效的 clash 控制器地址 {}: {}", address, e),
        })?;

        Ok(Self {
            base,
            secret: secret.filter(|s| !s.is_empty()),
            http,
        })
    }

    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or("127.0.0.1")
    }

    /// 构造指向控制器的请求
    pub fn request(&self, method: &str, path: &str) -> Result<HttpRequest> {
        let url = self.base.join(path).map_err(|e| PoolError::InvalidResponse {
            reason: format!("无效的指令路径 {}: {}", path, e),
        })?;

        let mut request = HttpRequest::new(method, url.as_str());
        if let Some(secret) = &self.secret {
            request = request.with_header("Authorization", format!("Bearer {}", secret));
        }
        Ok(request)
    }

    /// 执行指令，失败重试，重试耗尽返回 CommandFailed
    pub fn run(&self, request: &HttpRequest) -> Result<HttpResponse> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.http.fetch(request) {
                Ok(response) if response.ok() => return Ok(response),
                Ok(response) => warn!(
                    "[clash 指令失败] {} {} ({}/{}): {} {}",
                    request.method, request.url, attempt, MAX_ATTEMPTS, response.status, response.text
                ),
                Err(e) => warn!(
                    "[clash 指令失败] {} {} ({}/{}): {}",
                    request.method, request.url, attempt, MAX_ATTEMPTS, e
                ),
            }
        }

        Err(PoolError::CommandFailed {
            method: request.method.clone(),
            url: request.url.clone(),
            attempts: MAX_ATTEMPTS,
        })
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("base", &self.base.as_str())
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}
