//! 代理源加载器
//! 根据配置里的 `ref` 找到对应的构造函数，其余字段交给该类型的配置结构体

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::clash::{ClashConfig, ClashProvider};
use crate::error::{PoolError, Result};
use crate::http::HttpClient;
use crate::provider::{
    ApiConfig, ApiProvider, Provider, QueueConfig, QueueProvider, StaticConfig, StaticProvider,
};
use crate::store::{MemoryStore, QueueStore};

/// 构造代理源时可用的外部依赖
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub http: Arc<dyn HttpClient>,
    stores: HashMap<String, Arc<dyn QueueStore>>,
}

impl BuildContext {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        let default: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
        Self {
            http,
            stores: HashMap::from([("default".to_string(), default)]),
        }
    }

    /// 注册（或替换）一个命名存储
    pub fn with_store(mut self, name: &str, store: Arc<dyn QueueStore>) -> Self {
        self.stores.insert(name.to_string(), store);
        self
    }

    pub fn store(&self, name: &str) -> Result<Arc<dyn QueueStore>> {
        self.stores.get(name).cloned().ok_or_else(|| PoolError::Store {
            reason: format!("未注册的存储: {}", name),
        })
    }
}

/// 构造函数
pub type Constructor =
    Arc<dyn Fn(&Value, &BuildContext) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// ref → 构造函数
pub struct ProviderLoader {
    constructors: HashMap<String, Constructor>,
    context: BuildContext,
}

impl ProviderLoader {
    /// 空加载器，不含内置类型
    pub fn empty(context: BuildContext) -> Self {
        Self {
            constructors: HashMap::new(),
            context,
        }
    }

    /// 注册内置的 api / clash / queue / static 四种代理源
    pub fn new(context: BuildContext) -> Self {
        let mut loader = Self::empty(context);

        loader.register(&["api", "ApiProxy"], |record, context| {
            let config: ApiConfig = parse("api", record)?;
            Ok(Arc::new(ApiProvider::new(config, context.http.clone())?))
        });
        loader.register(&["clash", "ClashProxy"], |record, context| {
            let config: ClashConfig = parse("clash", record)?;
            Ok(Arc::new(ClashProvider::new(config, context.http.clone())?))
        });
        loader.register(&["queue", "RedisProxy"], |record, context| {
            let config: QueueConfig = parse("queue", record)?;
            let store = context.store(&config.store)?;
            Ok(Arc::new(QueueProvider::new(config, store)))
        });
        loader.register(&["static", "CustomProxy"], |record, _| {
            let config: StaticConfig = parse("static", record)?;
            Ok(Arc::new(StaticProvider::new(config)))
        });

        loader
    }

    /// 注册构造函数，名称不区分大小写
    pub fn register<F>(&mut self, names: &[&str], constructor: F)
    where
        F: Fn(&Value, &BuildContext) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(constructor);
        for name in names {
            self.constructors
                .insert(name.to_lowercase(), constructor.clone());
        }
    }

    /// 按 `ref` 构造代理源
    pub fn load(&self, record: &Value) -> Result<Arc<dyn Provider>> {
        let reference = record
            .get("ref")
            .and_then(Value::as_str)
            .ok_or_else(|| PoolError::ConfigResolutionFailed {
                reference: record.get("ref").map(Value::to_string).unwrap_or_default(),
            })?;

        // 兼容带模块路径的写法，如 bricks.lib.proxies.ClashProxy
        let name = reference.to_lowercase();
        let short = name.rsplit('.').next().unwrap_or_default();
        let constructor = self
            .constructors
            .get(&name)
            .or_else(|| self.constructors.get(short))
            .ok_or_else(|| PoolError::ConfigResolutionFailed {
                reference: reference.to_string(),
            })?;

        debug!("[构造代理源] ref: {}", reference);
        constructor(record, &self.context)
    }
}

impl fmt::Debug for ProviderLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("ProviderLoader")
            .field("constructors", &names)
            .field("context", &self.context)
            .finish()
    }
}

/// 多余字段忽略，缺省字段使用默认值
fn parse<T: DeserializeOwned>(reference: &str, record: &Value) -> Result<T> {
    serde_json::from_value(record.clone()).map_err(|source| PoolError::InvalidConfig {
        reference: reference.to_string(),
        source,
    })
}
