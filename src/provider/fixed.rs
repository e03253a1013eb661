//! 固定地址代理

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{CommonOptions, Provider, ProviderOptions, RecoverHook};
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(alias = "key", default)]
    pub address: String,
    #[serde(flatten)]
    pub common: CommonOptions,
}

/// 永远返回同一个地址
#[derive(Debug)]
pub struct StaticProvider {
    address: String,
    options: ProviderOptions,
}

impl StaticProvider {
    pub fn new(config: StaticConfig) -> Self {
        let mut options = ProviderOptions::new(config.common);
        options.recover = RecoverHook::Disabled;
        Self {
            address: config.address,
            options,
        }
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Provider for StaticProvider {
    fn options(&self) -> &ProviderOptions {
        &self.options
    }

    fn obtain(&self, _timeout: Option<Duration>) -> Result<String> {
        Ok(self.address.clone())
    }
}
