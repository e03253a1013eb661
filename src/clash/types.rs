//! Clash 节点轮换相关类型

use std::fmt;
use std::sync::Arc;

/// 节点过滤规则
#[derive(Clone)]
pub enum NodeMatcher {
    /// 排除给定名称的节点
    Exclude(Vec<String>),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl NodeMatcher {
    pub fn matches(&self, node: &str) -> bool {
        match self {
            NodeMatcher::Exclude(names) => !names.iter().any(|name| name == node),
            NodeMatcher::Custom(matcher) => matcher(node),
        }
    }
}

impl Default for NodeMatcher {
    fn default() -> Self {
        NodeMatcher::Exclude(default_excluded())
    }
}

pub(crate) fn default_excluded() -> Vec<String> {
    vec!["DIRECT".to_string(), "REJECT".to_string()]
}

impl fmt::Debug for NodeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeMatcher::Exclude(names) => f.debug_tuple("Exclude").field(names).finish(),
            NodeMatcher::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// 循环使用的节点序列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCycle {
    nodes: Vec<String>,
    index: usize,
}

impl NodeCycle {
    /// 从当前节点的下一个开始排列，再按规则过滤
    pub fn rotate_from(all: &[String], now: Option<&str>, matcher: &NodeMatcher) -> Self {
        let start = now
            .and_then(|now| all.iter().position(|node| node == now))
            .map_or(0, |i| i + 1);

        let nodes = all[start..]
            .iter()
            .chain(&all[..start])
            .filter(|node| matcher.matches(node))
            .cloned()
            .collect();

        Self { nodes, index: 0 }
    }

    /// 下一个节点，序列为空时返回 None
    pub fn next_node(&mut self) -> Option<&str> {
        if self.nodes.is_empty() {
            return None;
        }
        let node = &self.nodes[self.index % self.nodes.len()];
        self.index = (self.index + 1) % self.nodes.len();
        Some(node)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// 修改 clash 配置的方式
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigUpdate {
    /// PATCH /configs，修改部分配置
    Patch(serde_json::Value),
    /// PUT /configs，从文件重新加载
    Reload { path: String, force: bool },
}
