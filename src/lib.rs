//! 代理池
//!
//! 从多种代理源（提取 API、clash 控制器、队列、固定地址）获取代理，
//! 按线程或全局缓存租约，并根据使用次数自动回收和轮换。
//!
//! ```no_run
//! use proxy_lease_pool::{Candidate, MANAGER};
//! use serde_json::json;
//!
//! let candidates = [Candidate::from(json!({"ref": "clash", "key": "127.0.0.1:9090", "threshold": 10}))];
//! let lease = MANAGER.get(&candidates, None)?;
//! if !lease.is_empty() {
//!     // 使用 lease.address() 发请求 ...
//!     MANAGER.use_lease(&lease)?;
//! }
//! # Ok::<(), proxy_lease_pool::PoolError>(())
//! ```

pub mod clash;
pub mod config;
pub mod error;
pub mod http;
pub mod lease;
pub mod loader;
pub mod manager;
pub mod provider;
pub mod store;

pub use clash::{ClashConfig, ClashProvider};
pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient, UnavailableClient};
pub use lease::{Lease, Usage};
pub use loader::{BuildContext, ProviderLoader};
pub use manager::{Candidate, MANAGER, Mode, PoolManager};
pub use provider::{Provider, ProviderOptions, RecoverHook};
pub use store::{MemoryStore, QueueStore};
