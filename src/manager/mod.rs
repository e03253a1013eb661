//! 代理池管理器
//!
//! 按配置构造并缓存代理源，按调用线程（隔离模式）或全局（共享模式）
//! 缓存租约，并负责使用计数、回收、清除和刷新。
//!
//! 所有公开操作都接受多个候选配置，按顺序尝试直到拿到可用代理。

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lazy_static::lazy_static;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::http::{ReqwestClient, UnavailableClient};
use crate::lease::{Lease, Usage};
use crate::loader::{BuildContext, ProviderLoader};
use crate::provider::{self, Provider};

/// 租约缓存方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// 每个线程各自缓存
    #[default]
    Isolated,
    /// 所有线程共享一份缓存
    Shared,
}

/// 候选配置：声明式配置或已构造好的代理源
#[derive(Debug, Clone)]
pub enum Candidate {
    Record(Value),
    Instance(Arc<dyn Provider>),
}

impl From<Value> for Candidate {
    fn from(record: Value) -> Self {
        Candidate::Record(record)
    }
}

impl From<Arc<dyn Provider>> for Candidate {
    fn from(provider: Arc<dyn Provider>) -> Self {
        Candidate::Instance(provider)
    }
}

type Slot = HashMap<String, Lease>;
type ThreadScopes = DashMap<ThreadId, Arc<Mutex<Slot>>>;

enum Scopes {
    Isolated(Arc<ThreadScopes>),
    Shared(Arc<Mutex<Slot>>),
}

impl Scopes {
    fn new(mode: Mode) -> Self {
        match mode {
            Mode::Isolated => Scopes::Isolated(Arc::new(DashMap::new())),
            Mode::Shared => Scopes::Shared(Arc::new(Mutex::new(Slot::new()))),
        }
    }
}

/// 线程退出时移除该线程在各个管理器里的隔离缓存
struct ScopeGuard {
    scopes: Weak<ThreadScopes>,
    thread: ThreadId,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(scopes) = self.scopes.upgrade() {
            scopes.remove(&self.thread);
        }
    }
}

thread_local! {
    static SCOPE_GUARDS: RefCell<Vec<ScopeGuard>> = const { RefCell::new(Vec::new()) };
}

fn watch_thread_exit(scopes: &Arc<ThreadScopes>, thread: ThreadId) {
    let scopes = Arc::downgrade(scopes);
    // 线程正在析构时无法再注册，此时缓存由 forget_context 或 set_mode 释放
    let _ = SCOPE_GUARDS.try_with(|guards| {
        let mut guards = guards.borrow_mut();
        guards.retain(|guard| guard.scopes.strong_count() > 0);
        if !guards.iter().any(|guard| guard.scopes.ptr_eq(&scopes)) {
            guards.push(ScopeGuard { scopes, thread });
        }
    });
}

pub struct PoolManager {
    loader: ProviderLoader,
    registry: DashMap<String, Arc<dyn Provider>>,
    scopes: RwLock<Scopes>,
    mode: RwLock<Mode>,
}

impl PoolManager {
    pub fn new(loader: ProviderLoader) -> Self {
        Self::with_mode(loader, Mode::default())
    }

    pub fn with_mode(loader: ProviderLoader, mode: Mode) -> Self {
        Self {
            loader,
            registry: DashMap::new(),
            scopes: RwLock::new(Scopes::new(mode)),
            mode: RwLock::new(mode),
        }
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// 切换缓存方式，已缓存的租约全部丢弃
    ///
    /// 切换期间不应有其他线程在使用管理器。
    pub fn set_mode(&self, mode: Mode) {
        *self.scopes.write().unwrap_or_else(PoisonError::into_inner) = Scopes::new(mode);
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// 配置对应的缓存 key
    ///
    /// 声明式配置按规范化后的 JSON 计算，结构相同的配置得到相同的 key；
    /// 代理源实例按实例本身区分。
    pub fn key_of(candidate: &Candidate) -> String {
        let mut hasher = DefaultHasher::new();
        match candidate {
            Candidate::Record(record) => {
                "record".hash(&mut hasher);
                record.to_string().hash(&mut hasher);
            }
            Candidate::Instance(provider) => {
                "instance".hash(&mut hasher);
                (Arc::as_ptr(provider) as *const () as usize).hash(&mut hasher);
            }
        }
        format!("{:016x}", hasher.finish())
    }

    /// 构造代理源，同一个 key 只保留一个实例
    pub fn build(&self, candidate: &Candidate) -> Result<Arc<dyn Provider>> {
        let key = Self::key_of(candidate);
        if let Some(provider) = self.registry.get(&key) {
            return Ok(provider.clone());
        }

        let built = match candidate {
            Candidate::Instance(provider) => provider.clone(),
            Candidate::Record(record) => self.loader.load(record)?,
        };
        debug!("[代理源] 新建 {:?} key: {}", built, key);

        // 并发构造时使用先插入的实例
        Ok(self.registry.entry(key).or_insert(built).clone())
    }

    /// 已构造的代理源数量
    pub fn providers(&self) -> usize {
        self.registry.len()
    }

    /// 当前线程可见的缓存
    fn scope(&self) -> Arc<Mutex<Slot>> {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        let scope = match &*scopes {
            Scopes::Isolated(scopes) => {
                let thread = thread::current().id();
                match scopes.entry(thread) {
                    Entry::Occupied(entry) => entry.get().clone(),
                    Entry::Vacant(entry) => {
                        let slot = entry.insert(Arc::default()).clone();
                        watch_thread_exit(scopes, thread);
                        slot
                    }
                }
            }
            Scopes::Shared(slot) => slot.clone(),
        };
        scope
    }

    /// 当前持有缓存的上下文数量：隔离模式下为存活线程数，共享模式下为 1
    pub fn contexts(&self) -> usize {
        match &*self.scopes.read().unwrap_or_else(PoisonError::into_inner) {
            Scopes::Isolated(scopes) => scopes.len(),
            Scopes::Shared(_) => 1,
        }
    }

    fn lock(scope: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
        scope.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 获取代理
    ///
    /// 已缓存的直接返回；否则从代理源获取，超时则尝试下一个候选。
    /// 全部失败时返回空租约，只有代理源的致命错误才会返回 Err。
    pub fn get(&self, candidates: &[Candidate], timeout: Option<Duration>) -> Result<Lease> {
        let scope = self.scope();
        let mut slot = Self::lock(&scope);
        self.get_in(&mut slot, candidates, timeout)
    }

    fn get_in(
        &self,
        slot: &mut Slot,
        candidates: &[Candidate],
        timeout: Option<Duration>,
    ) -> Result<Lease> {
        for candidate in candidates {
            let key = Self::key_of(candidate);
            if let Some(lease) = slot.get(&key) {
                return Ok(lease.clone());
            }

            let provider = self.build(candidate)?;
            let lease = match provider::lease(&provider, timeout) {
                Ok(lease) => lease,
                Err(e) if e.is_timeout() => {
                    warn!("[获取代理超时] {:?}: {}", provider, e);
                    Lease::empty()
                }
                Err(e) => return Err(e),
            };

            if !lease.is_empty() {
                lease.bind(&key);
                slot.insert(key, lease.clone());
                return Ok(lease);
            }
        }

        Ok(Lease::empty())
    }

    /// 当前缓存的代理，不会触发获取
    pub fn now(&self, candidates: &[Candidate]) -> Lease {
        let scope = self.scope();
        let slot = Self::lock(&scope);
        let lease = candidates
            .iter()
            .find_map(|candidate| slot.get(&Self::key_of(candidate)).cloned())
            .unwrap_or_default();
        lease
    }

    /// 清除代理：调用清除回调并从缓存移除，不计入使用次数
    pub fn clear(&self, candidates: &[Candidate]) -> Result<()> {
        let scope = self.scope();
        let mut slot = Self::lock(&scope);
        Self::clear_in(&mut slot, candidates)
    }

    fn clear_in(slot: &mut Slot, candidates: &[Candidate]) -> Result<()> {
        Self::release_in(slot, candidates, "清除", Lease::clear)
    }

    /// 回收代理：调用回收回调并从缓存移除
    pub fn recover(&self, candidates: &[Candidate]) -> Result<()> {
        let scope = self.scope();
        let mut slot = Self::lock(&scope);
        Self::release_in(&mut slot, candidates, "回收", Lease::recover)
    }

    /// 对每个缓存的租约执行回调，成功后才移出缓存
    ///
    /// 某个回调失败不影响其余候选，最后返回第一个错误。
    fn release_in<F>(slot: &mut Slot, candidates: &[Candidate], action: &str, f: F) -> Result<()>
    where
        F: Fn(&Lease) -> Result<()>,
    {
        let mut first_error = None;
        for candidate in candidates {
            let key = Self::key_of(candidate);
            let Some(lease) = slot.get(&key).cloned() else {
                continue;
            };
            match f(&lease) {
                Ok(()) => {
                    slot.remove(&key);
                }
                Err(e) => {
                    warn!("[{}代理失败] {}: {}", action, lease.address(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// 刷新代理：清除后重新获取
    pub fn fresh(&self, candidates: &[Candidate], timeout: Option<Duration>) -> Result<Lease> {
        let scope = self.scope();
        let mut slot = Self::lock(&scope);
        Self::clear_in(&mut slot, candidates)?;
        self.get_in(&mut slot, candidates, timeout)
    }

    /// 使用一次代理，用尽后从缓存中移除
    pub fn use_lease(&self, lease: &Lease) -> Result<Usage> {
        let usage = lease.mark_used()?;
        if usage == Usage::Exhausted {
            if let Some(key) = lease.cache_key() {
                let scope = self.scope();
                let mut slot = Self::lock(&scope);
                // 只移除同一个租约，避免误删已经换上的新租约
                if slot.get(key).is_some_and(|cached| cached.ptr_eq(lease)) {
                    slot.remove(key);
                    debug!("[代理用尽] 移除 {}", lease.address());
                }
            }
        }
        Ok(usage)
    }

    /// 立即丢弃当前线程的隔离缓存，不必等到线程退出
    pub fn forget_context(&self) {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        if let Scopes::Isolated(scopes) = &*scopes {
            scopes.remove(&thread::current().id());
        }
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("mode", &self.mode())
            .field("providers", &self.registry.len())
            .finish()
    }
}

lazy_static! {
    /// 进程级默认管理器，使用 reqwest 客户端和内存队列
    pub static ref MANAGER: PoolManager = PoolManager::new(default_loader());
}

fn default_loader() -> ProviderLoader {
    let context = match ReqwestClient::new(Duration::from_secs(10)) {
        Ok(http) => BuildContext::new(Arc::new(http)),
        Err(e) => {
            // 不依赖 HTTP 的代理源（队列、固定地址）仍然可用
            error!("[代理池] 默认 HTTP 客户端创建失败: {}", e);
            BuildContext::new(Arc::new(UnavailableClient::new(e.to_string())))
        }
    };
    ProviderLoader::new(context)
}
