use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::manager::{Candidate, Mode};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    // 缓存方式
    pub mode: Mode,

    // 获取参数
    pub timeout_ms: Option<u64>,
    pub uses: u32,

    // 候选代理配置，按顺序尝试
    pub candidates: Vec<Value>,

    // 内存队列的初始地址
    pub queues: BTreeMap<String, Vec<String>>,

    // 日志配置
    pub log_level: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Isolated,
            timeout_ms: Some(10_000),
            uses: 1,
            candidates: vec![],
            queues: BTreeMap::new(),
            log_level: "info".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PoolConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get_timeout_duration(&self) -> Option<std::time::Duration> {
        self.timeout_ms.map(std::time::Duration::from_millis)
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.candidates.iter().cloned().map(Candidate::from).collect()
    }
}
