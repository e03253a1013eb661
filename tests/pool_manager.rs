mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::ScriptedClient;
use proxy_lease_pool::provider::{CommonOptions, StaticConfig, StaticProvider};
use proxy_lease_pool::{
    BuildContext, Candidate, Lease, MemoryStore, Mode, PoolError, PoolManager, Provider,
    ProviderLoader, ProviderOptions, QueueStore, RecoverHook, Usage,
};
use serde_json::json;

const SHORT: Option<Duration> = Some(Duration::from_millis(30));

struct Fixture {
    manager: PoolManager,
    store: Arc<MemoryStore>,
    client: Arc<ScriptedClient>,
}

fn fixture(mode: Mode, client: ScriptedClient) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let client = Arc::new(client);
    let context = BuildContext::new(client.clone()).with_store("default", store.clone());
    Fixture {
        manager: PoolManager::with_mode(ProviderLoader::new(context), mode),
        store,
        client,
    }
}

fn queue(threshold: Option<u64>) -> Candidate {
    Candidate::from(json!({
        "ref": "queue",
        "key": "proxies",
        "poll_interval_ms": 5,
        "threshold": threshold,
    }))
}

fn fixed(address: &str) -> Candidate {
    Candidate::from(json!({"ref": "static", "key": address}))
}

/// 阈值为 `threshold` 且记录回收次数的固定代理
fn counted(threshold: u64) -> (Candidate, Arc<AtomicUsize>) {
    let recovered = Arc::new(AtomicUsize::new(0));
    let counter = recovered.clone();
    let mut options = ProviderOptions::new(CommonOptions {
        threshold: Some(threshold),
        ..Default::default()
    });
    options.recover = RecoverHook::Custom(Arc::new(move |_: &Lease| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), PoolError>(())
    }));
    let provider: Arc<dyn Provider> = Arc::new(
        StaticProvider::new(StaticConfig {
            address: "10.0.0.1:3128".to_string(),
            ..Default::default()
        })
        .with_options(options),
    );
    (Candidate::from(provider), recovered)
}

#[test]
fn test_threshold_recovers_exactly_once() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    let (candidate, recovered) = counted(3);
    let lease = f.manager.get(&[candidate], None).unwrap();

    assert_eq!(f.manager.use_lease(&lease).unwrap(), Usage::Valid);
    assert_eq!(f.manager.use_lease(&lease).unwrap(), Usage::Valid);
    assert_eq!(recovered.load(Ordering::SeqCst), 0);
    assert_eq!(f.manager.use_lease(&lease).unwrap(), Usage::Exhausted);
    assert_eq!(recovered.load(Ordering::SeqCst), 1);
    for _ in 0..5 {
        assert_eq!(lease.mark_used().unwrap(), Usage::Exhausted);
    }
    assert_eq!(recovered.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unbounded_never_recovers() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    let candidates = [fixed("1.1.1.1:80")];
    let lease = f.manager.get(&candidates, None).unwrap();
    for _ in 0..50 {
        assert_eq!(f.manager.use_lease(&lease).unwrap(), Usage::Valid);
    }
    assert!(f.manager.now(&candidates).ptr_eq(&lease));
}

#[test]
fn test_timeout_falls_back_to_next_candidate() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    let lease = f
        .manager
        .get(&[queue(None), fixed("2.2.2.2:80")], SHORT)
        .unwrap();
    assert_eq!(lease.address(), "http://2.2.2.2:80");
}

#[test]
fn test_timeout_everywhere_gives_empty_lease() {
    let f = fixture(Mode::Isolated, ScriptedClient::offline());
    let api = Candidate::from(json!({
        "ref": "api",
        "endpoint": "http://api.example.com/get",
        "poll_interval_ms": 1,
    }));
    let lease = f.manager.get(&[queue(None), api], SHORT).unwrap();
    assert!(lease.is_empty());
    assert!(!f.client.sent().is_empty());
}

#[test]
fn test_clear_forces_new_acquisition() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    f.store.extend("proxies", ["1.1.1.1:80", "2.2.2.2:80"]).unwrap();
    let candidates = [queue(None)];

    let first = f.manager.get(&candidates, None).unwrap();
    f.manager.clear(&candidates).unwrap();
    assert!(f.manager.now(&candidates).is_empty());

    let second = f.manager.get(&candidates, None).unwrap();
    assert!(!second.ptr_eq(&first));
    assert_eq!(second.raw(), "2.2.2.2:80");
    // 清除不会把地址放回队列
    assert_eq!(f.store.len("proxies").unwrap(), 0);
}

#[test]
fn test_clear_static_still_new_instance() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    let candidates = [fixed("1.1.1.1:80")];
    let first = f.manager.get(&candidates, None).unwrap();
    let second = f.manager.fresh(&candidates, None).unwrap();
    assert_eq!(first.address(), second.address());
    assert!(!first.ptr_eq(&second));
}

#[test]
fn test_recover_returns_address_to_queue() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    f.store.push("proxies", "1.1.1.1:80").unwrap();
    let candidates = [queue(None)];

    f.manager.get(&candidates, None).unwrap();
    assert_eq!(f.store.len("proxies").unwrap(), 0);
    f.manager.recover(&candidates).unwrap();
    assert!(f.manager.now(&candidates).is_empty());
    assert_eq!(f.store.pop("proxies").unwrap().as_deref(), Some("1.1.1.1:80"));
}

#[test]
fn test_exhausted_lease_is_evicted_and_recycled() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    f.store.push("proxies", "1.1.1.1:80").unwrap();
    let candidates = [queue(Some(2))];

    let lease = f.manager.get(&candidates, None).unwrap();
    assert_eq!(f.manager.use_lease(&lease).unwrap(), Usage::Valid);
    assert!(f.manager.now(&candidates).ptr_eq(&lease));
    assert_eq!(f.manager.use_lease(&lease).unwrap(), Usage::Exhausted);
    assert!(f.manager.now(&candidates).is_empty());

    let again = f.manager.get(&candidates, None).unwrap();
    assert_eq!(again.raw(), "1.1.1.1:80");
    assert!(!again.ptr_eq(&lease));
}

#[test]
fn test_stale_lease_does_not_evict_replacement() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    f.store.extend("proxies", ["1.1.1.1:80", "2.2.2.2:80"]).unwrap();
    let candidates = [queue(Some(1))];

    let old = f.manager.get(&candidates, None).unwrap();
    let new = f.manager.fresh(&candidates, None).unwrap();
    assert_eq!(f.manager.use_lease(&old).unwrap(), Usage::Exhausted);
    assert!(f.manager.now(&candidates).ptr_eq(&new));
}

#[test]
fn test_isolated_threads_do_not_share() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    f.store.extend("proxies", ["1.1.1.1:80", "2.2.2.2:80"]).unwrap();
    let candidates = [queue(None)];

    let leases: Vec<Lease> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| s.spawn(|| f.manager.get(&candidates, None).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(!leases[0].ptr_eq(&leases[1]));
    assert_ne!(leases[0].raw(), leases[1].raw());
    assert!(f.manager.now(&candidates).is_empty());
    assert_eq!(f.manager.providers(), 1);
}

#[test]
fn test_shared_threads_see_same_lease() {
    let f = fixture(Mode::Shared, ScriptedClient::new());
    f.store.extend("proxies", ["1.1.1.1:80", "2.2.2.2:80"]).unwrap();
    let candidates = [queue(None)];

    let leases: Vec<Lease> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| f.manager.get(&candidates, None).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(leases.iter().all(|lease| lease.ptr_eq(&leases[0])));
    assert!(f.manager.now(&candidates).ptr_eq(&leases[0]));
    assert_eq!(f.store.len("proxies").unwrap(), 1);
}

#[test]
fn test_concurrent_build_reuses_one_provider() {
    let f = fixture(Mode::Isolated, ScriptedClient::new());
    let candidate = fixed("1.1.1.1:80");

    let built: Vec<Arc<dyn Provider>> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| f.manager.build(&candidate).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(built.iter().all(|p| Arc::ptr_eq(p, &built[0])));
    assert_eq!(f.manager.providers(), 1);
}

#[test]
fn test_api_jsonp_drained_in_order() {
    let client = ScriptedClient::new();
    client.push(200, "ok(1.2.3.4:8080,5.6.7.8:9090)");
    client.push(200, "ok(9.9.9.9:1)");
    let f = fixture(Mode::Isolated, client);
    let candidates = [Candidate::from(json!({
        "ref": "api",
        "key": "http://api.example.com/get",
        "pattern": r"\d+\.\d+\.\d+\.\d+:\d+",
    }))];

    let first = f.manager.get(&candidates, None).unwrap();
    let second = f.manager.fresh(&candidates, None).unwrap();
    assert_eq!(first.raw(), "1.2.3.4:8080");
    assert_eq!(second.raw(), "5.6.7.8:9090");
    assert_eq!(f.client.sent().len(), 1);

    let third = f.manager.fresh(&candidates, None).unwrap();
    assert_eq!(third.raw(), "9.9.9.9:1");
    assert_eq!(f.client.sent().len(), 2);
}

#[test]
fn test_clash_rotates_on_exhaustion() {
    let client = ScriptedClient::new();
    client.push(204, "");
    client.push(200, r#"{"mixed-port":7890}"#);
    client.push(200, r#"{"proxies":{"GLOBAL":{"now":"B","all":["A","B","C"]}}}"#);
    client.push(204, "");
    let f = fixture(Mode::Isolated, client);
    let candidates = [Candidate::from(json!({
        "ref": "clash",
        "key": "127.0.0.1:9090",
        "threshold": 1,
    }))];

    let lease = f.manager.get(&candidates, None).unwrap();
    assert_eq!(lease.address(), "http://127.0.0.1:7890");
    assert_eq!(f.manager.use_lease(&lease).unwrap(), Usage::Exhausted);
    assert!(f.manager.now(&candidates).is_empty());

    let lease = f.manager.get(&candidates, None).unwrap();
    assert_eq!(lease.address(), "http://127.0.0.1:7890");
    assert_eq!(f.manager.use_lease(&lease).unwrap(), Usage::Exhausted);

    let sent = f.client.sent();
    let methods: Vec<_> = sent.iter().map(|r| r.method.as_str()).collect();
    assert_eq!(methods, vec!["PATCH", "GET", "GET", "PUT"]);
    let switch = sent.last().unwrap();
    assert_eq!(switch.url, "http://127.0.0.1:9090/proxies/GLOBAL");
    assert_eq!(switch.body, Some(json!({"name": "C"})));
}

#[test]
fn test_unreachable_clash_propagates() {
    let f = fixture(Mode::Isolated, ScriptedClient::offline());
    let err = f
        .manager
        .get(&[Candidate::from(json!({"ref": "clash", "key": "127.0.0.1:9090"}))], SHORT)
        .unwrap_err();
    assert!(matches!(err, PoolError::CommandFailed { .. }));
}
