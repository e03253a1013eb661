//! Clash 配置与节点缓存
//! `cache_policy` 秒后自动失效，-1 表示永不过期

use std::time::{Duration, Instant};

use serde_json::Value;

use super::types::NodeCycle;

#[derive(Debug, Clone)]
pub struct ClashCache {
    configs: Option<Value>,
    nodes: Option<NodeCycle>,
    refreshed_at: Instant,
    policy: Option<Duration>,
}

impl ClashCache {
    pub fn new(cache_policy: i64) -> Self {
        Self {
            configs: None,
            nodes: None,
            refreshed_at: Instant::now(),
            policy: u64::try_from(cache_policy).ok().map(Duration::from_secs),
        }
    }

    pub fn configs(&self) -> Option<&Value> {
        self.configs.as_ref()
    }

    pub fn set_configs(&mut self, configs: Value) {
        self.configs = Some(configs);
    }

    pub fn invalidate_configs(&mut self) {
        self.configs = None;
    }

    pub fn nodes_mut(&mut self) -> Option<&mut NodeCycle> {
        self.nodes.as_mut()
    }

    pub fn set_nodes(&mut self, nodes: NodeCycle) {
        self.nodes = Some(nodes);
    }

    pub fn has_nodes(&self) -> bool {
        self.nodes.is_some()
    }

    /// 缓存是否已过期
    pub fn is_stale(&self) -> bool {
        self.policy
            .is_some_and(|policy| self.refreshed_at.elapsed() > policy)
    }

    /// 强制或过期时清空缓存，返回是否清空
    pub fn clear(&mut self, force: bool) -> bool {
        if !force && !self.is_stale() {
            return false;
        }
        self.nodes = None;
        self.configs = None;
        self.refreshed_at = Instant::now();
        true
    }
}
