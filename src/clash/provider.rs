//! 基于 clash 的代理源
//! 自动把 clash 切换为 global 模式，之后循环使用 selector 内的节点；
//! 租约地址始终是 clash 本地监听端口，回收 / 清除时切换节点

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::cache::ClashCache;
use super::controller::Controller;
use super::types::{ConfigUpdate, NodeCycle, NodeMatcher, default_excluded};
use crate::error::{PoolError, Result};
use crate::http::HttpClient;
use crate::lease::Lease;
use crate::provider::{CommonOptions, Provider, ProviderOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClashConfig {
    /// external-controller 地址，如 127.0.0.1:9090
    #[serde(alias = "key")]
    pub controller: String,
    #[serde(default)]
    pub secret: Option<String>,
    /// 缓存有效期（秒），-1 表示永不过期
    #[serde(default = "default_cache_policy")]
    pub cache_policy: i64,
    #[serde(default = "default_selector")]
    pub selector: String,
    /// 不参与轮换的节点
    #[serde(default = "default_excluded")]
    pub exclude: Vec<String>,
    #[serde(flatten)]
    pub common: CommonOptions,
}

fn default_cache_policy() -> i64 {
    -1
}

fn default_selector() -> String {
    "GLOBAL".to_string()
}

impl ClashConfig {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            secret: None,
            cache_policy: default_cache_policy(),
            selector: default_selector(),
            exclude: default_excluded(),
            common: CommonOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct ClashProvider {
    controller: Controller,
    selector: String,
    matcher: NodeMatcher,
    cache: Mutex<ClashCache>,
    current: Mutex<Option<String>>,
    options: ProviderOptions,
}

impl ClashProvider {
    pub fn new(config: ClashConfig, http: Arc<dyn HttpClient>) -> Result<Self> {
        let controller = Controller::new(&config.controller, config.secret, http)?;
        let provider = Self {
            controller,
            matcher: NodeMatcher::Exclude(config.exclude),
            cache: Mutex::new(ClashCache::new(config.cache_policy)),
            current: Mutex::new(None),
            options: ProviderOptions::new(config.common),
            selector: config.selector,
        };

        if provider.selector.eq_ignore_ascii_case("GLOBAL") {
            provider.set_configs(ConfigUpdate::Patch(json!({"mode": "Global"})))?;
        }
        Ok(provider)
    }

    pub fn with_matcher(mut self, matcher: NodeMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// 最近一次切换到的节点
    pub fn current(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cache(&self) -> MutexGuard<'_, ClashCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前 clash 配置，首次访问时请求 `/configs` 并缓存
    pub fn configs(&self) -> Result<Value> {
        if let Some(configs) = self.cache().configs() {
            return Ok(configs.clone());
        }

        let request = self.controller.request("GET", "/configs")?;
        let configs = self.controller.run(&request)?.json()?;
        self.cache().set_configs(configs.clone());
        Ok(configs)
    }

    /// 修改 clash 配置，完成后丢弃缓存的配置
    pub fn set_configs(&self, update: ConfigUpdate) -> Result<()> {
        let request = match update {
            ConfigUpdate::Reload { path, force } => self
                .controller
                .request("PUT", "/configs")?
                .with_param("force", force)
                .with_json(json!({"path": path})),
            ConfigUpdate::Patch(body) => self
                .controller
                .request("PATCH", "/configs")?
                .with_json(body),
        };

        self.controller.run(&request)?;
        self.cache().invalidate_configs();
        Ok(())
    }

    /// 节点组内的全部节点，同时刷新轮换序列
    ///
    /// 不指定 `group` 时读取 selector；返回中没有节点列表时不改动轮换序列。
    pub fn nodes(&self, group: Option<&str>) -> Result<Vec<String>> {
        let path = match group {
            Some(name) => format!("/proxies/{}", name),
            None => "/proxies".to_string(),
        };
        let request = self.controller.request("GET", &path)?;
        let data = self.controller.run(&request)?.json()?;

        let group = match group {
            Some(_) => &data,
            None => &data["proxies"][self.selector.as_str()],
        };
        let Some(items) = group["all"].as_array() else {
            return Ok(Vec::new());
        };
        let all: Vec<String> = items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect();
        let now = group["now"].as_str();

        let cycle = NodeCycle::rotate_from(&all, now, &self.matcher);
        self.cache().set_nodes(cycle);
        Ok(all)
    }

    /// 单个节点或节点组的信息
    pub fn node(&self, name: &str) -> Result<Value> {
        let request = self.controller.request("GET", &format!("/proxies/{}", name))?;
        self.controller.run(&request)?.json()
    }

    /// 测试节点延迟
    pub fn delay(&self, name: &str, timeout: Duration, url: &str) -> Result<Value> {
        let request = self
            .controller
            .request("GET", &format!("/proxies/{}/delay", name))?
            .with_param("timeout", timeout.as_millis())
            .with_param("url", url);
        self.controller.run(&request)?.json()
    }

    /// 切换 selector 使用的节点
    pub fn switch(&self, name: &str, selector: Option<&str>) -> Result<()> {
        let selector = selector.unwrap_or(&self.selector);
        let request = self
            .controller
            .request("PUT", &format!("/proxies/{}", selector))?
            .with_json(json!({"name": name}));
        self.controller.run(&request)?;
        Ok(())
    }

    pub fn rules(&self) -> Result<Value> {
        let request = self.controller.request("GET", "/rules")?;
        self.controller.run(&request)?.json()
    }

    /// 强制或缓存过期时丢弃节点序列和配置
    pub fn clear_cache(&self, force: bool) -> bool {
        self.cache().clear(force)
    }

    fn local_port(&self, configs: &Value) -> Option<u64> {
        let port = |name: &str| configs.get(name).and_then(Value::as_u64).filter(|p| *p != 0);
        let fallback = if self.options.common.scheme == "http" {
            "port"
        } else {
            "socks-port"
        };
        port("mixed-port").or_else(|| port(fallback))
    }
}

impl Provider for ClashProvider {
    fn options(&self) -> &ProviderOptions {
        &self.options
    }

    fn obtain(&self, _timeout: Option<Duration>) -> Result<String> {
        self.clear_cache(false);
        let configs = self.configs()?;
        let port = self.local_port(&configs).ok_or_else(|| PoolError::MissingPort {
            scheme: self.options.common.scheme.clone(),
        })?;
        Ok(format!("{}:{}", self.controller.host(), port))
    }

    /// 默认回收即切换节点
    fn release(&self, lease: &Lease) -> Result<()> {
        self.clear(lease)
    }

    /// 切换到下一个节点；第一次调用只加载节点序列
    fn clear(&self, _lease: &Lease) -> Result<()> {
        self.clear_cache(false);
        if !self.cache().has_nodes() {
            self.nodes(None)?;
            return Ok(());
        }

        let next = self
            .cache()
            .nodes_mut()
            .and_then(|cycle| cycle.next_node().map(str::to_string));
        let Some(next) = next else {
            warn!("[clash] selector {} 中没有可用节点", self.selector);
            return Ok(());
        };

        self.switch(&next, None)?;
        info!("[clash] {} 切换到节点 {}", self.selector, next);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(next);
        Ok(())
    }
}
