//! Clash 代理源封装
//! 通过 external-controller 接口轮换节点

mod cache;
pub mod controller;
mod provider;
mod types;

pub use cache::ClashCache;
pub use controller::Controller;
pub use provider::{ClashConfig, ClashProvider};
pub use types::{ConfigUpdate, NodeCycle, NodeMatcher};
