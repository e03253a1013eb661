use anyhow::{Result, anyhow};
use clap::Parser;
use proxy_lease_pool::{
    BuildContext, MemoryStore, Mode, PoolConfig, PoolManager, ProviderLoader, ReqwestClient,
    Usage,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// 代理池命令行工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short = 'f', long, default_value = "config/pool.yaml")]
    config: String,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 获取代理超时时间（毫秒）
    #[arg(long)]
    timeout: Option<u64>,

    /// 使用次数
    #[arg(long)]
    uses: Option<u32>,

    /// 线程共享模式
    #[arg(long)]
    shared: bool,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    if !Path::new(&args.config).exists() {
        return Err(anyhow!("配置文件不存在: {}", args.config));
    }
    let mut config = PoolConfig::load_from_file(&args.config)?;

    // 设置日志级别
    unsafe {
        if args.verbose {
            std::env::set_var("RUST_LOG", "debug");
        } else {
            std::env::set_var("RUST_LOG", args.log_level.as_deref().unwrap_or(&config.log_level));
        }
    }
    env_logger::init();

    // 覆盖命令行参数
    if let Some(timeout) = args.timeout {
        config.timeout_ms = Some(timeout);
    }
    if let Some(uses) = args.uses {
        config.uses = uses;
    }
    if args.shared {
        config.mode = Mode::Shared;
    }
    if config.candidates.is_empty() {
        return Err(anyhow!("配置文件中没有候选代理: {}", args.config));
    }

    // 内存队列
    let store = Arc::new(MemoryStore::new());
    for (key, addresses) in &config.queues {
        store.extend(key, addresses.iter().cloned())?;
    }

    let http = ReqwestClient::new(Duration::from_secs(10))?;
    let context = BuildContext::new(Arc::new(http)).with_store("default", store);
    let manager = PoolManager::with_mode(ProviderLoader::new(context), config.mode);

    let candidates = config.candidates();
    let lease = manager.get(&candidates, config.get_timeout_duration())?;
    if lease.is_empty() {
        println!("❌ 没有获取到代理");
        return Ok(());
    }
    println!("✅ 获取到代理: {}", lease);

    for i in 1..=config.uses {
        match manager.use_lease(&lease)? {
            Usage::Valid => println!("  {}. 可继续使用", i),
            Usage::Exhausted => {
                println!("  {}. 已用尽, 已回收", i);
                break;
            }
        }
    }

    let now = manager.now(&candidates);
    if now.is_empty() {
        println!("当前无缓存代理");
    } else {
        println!("当前代理: {} (已使用 {} 次)", now, now.uses());
    }

    Ok(())
}
