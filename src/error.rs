//! 代理池错误类型

use std::time::Duration;
use thiserror::Error;

/// 代理池统一错误
#[derive(Error, Debug)]
pub enum PoolError {
    /// 在给定时间内没有拿到可用代理
    #[error("获取代理超时 (已等待 {waited:?})")]
    Timeout { waited: Duration },

    /// clash 控制器指令重试耗尽
    #[error("[clash 指令执行失败]: url: {url}, method: {method}, 重试 {attempts} 次")]
    CommandFailed {
        method: String,
        url: String,
        attempts: usize,
    },

    /// 配置里的 ref 无法解析为已注册的代理类型
    #[error("无法解析代理类型: '{reference}'")]
    ConfigResolutionFailed { reference: String },

    #[error("代理配置 '{reference}' 无效: {source}")]
    InvalidConfig {
        reference: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("响应无效: {reason}")]
    InvalidResponse { reason: String },

    #[error("clash 配置中没有可用的 {scheme} 端口")]
    MissingPort { scheme: String },

    #[error("存储错误: {reason}")]
    Store { reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

impl PoolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout { .. })
    }
}

pub type Result<T, E = PoolError> = std::result::Result<T, E>;
