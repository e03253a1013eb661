//! 从队列存储中提取代理

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use super::{CommonOptions, Deadline, Provider, ProviderOptions};
use crate::error::Result;
use crate::lease::Lease;
use crate::store::QueueStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 队列 key
    pub key: String,
    /// 加载器上下文中的存储名称
    #[serde(default = "default_store")]
    pub store: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(flatten)]
    pub common: CommonOptions,
}

fn default_store() -> String {
    "default".to_string()
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    1000
}

impl QueueConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            store: default_store(),
            poll_interval_ms: default_poll_interval_ms(),
            common: CommonOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct QueueProvider {
    key: String,
    poll_interval: Duration,
    store: Arc<dyn QueueStore>,
    options: ProviderOptions,
}

impl QueueProvider {
    pub fn new(config: QueueConfig, store: Arc<dyn QueueStore>) -> Self {
        Self {
            key: config.key,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            store,
            options: ProviderOptions::new(config.common),
        }
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }
}

impl Provider for QueueProvider {
    fn options(&self) -> &ProviderOptions {
        &self.options
    }

    fn obtain(&self, timeout: Option<Duration>) -> Result<String> {
        let deadline = Deadline::new(timeout);
        loop {
            if let Some(address) = self.store.pop(&self.key)? {
                return Ok(address);
            }
            warn!("[获取代理失败] queue: {}", self.key);
            deadline.wait(self.poll_interval)?;
        }
    }

    /// 把地址放回队列
    fn release(&self, lease: &Lease) -> Result<()> {
        if lease.raw().is_empty() {
            return Ok(());
        }
        self.store.push(&self.key, lease.raw())
    }
}
