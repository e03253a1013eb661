//! 队列存储
//! 队列代理源从这里弹出 / 放回地址

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use crate::error::{PoolError, Result};

/// 以 key 区分的地址队列
pub trait QueueStore: Send + Sync + fmt::Debug {
    /// 弹出一个地址，队列为空时返回 None
    fn pop(&self, key: &str) -> Result<Option<String>>;

    fn push(&self, key: &str, address: &str) -> Result<()>;

    fn len(&self, key: &str) -> Result<usize>;
}

/// 进程内的队列存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 批量放入地址
    pub fn extend<I, S>(&self, key: &str, addresses: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut queues = self.lock()?;
        queues
            .entry(key.to_string())
            .or_default()
            .extend(addresses.into_iter().map(Into::into));
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, VecDeque<String>>>> {
        self.queues.lock().map_err(|e| PoolError::Store {
            reason: format!("队列锁已损坏: {}", e),
        })
    }
}

impl QueueStore for MemoryStore {
    fn pop(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get_mut(key).and_then(VecDeque::pop_front))
    }

    fn push(&self, key: &str, address: &str) -> Result<()> {
        self.lock()?
            .entry(key.to_string())
            .or_default()
            .push_back(address.to_string());
        Ok(())
    }

    fn len(&self, key: &str) -> Result<usize> {
        Ok(self.lock()?.get(key).map_or(0, VecDeque::len))
    }
}
