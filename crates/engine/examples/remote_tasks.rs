use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use task_runtime::{Context, EngineConfig, Error, RemoteFn, TaskPriority};
use prettytable::{row, Table};
use rand::Rng;
use tracing_subscriber::EnvFilter;

/// 模拟一个耗时不定的计算：休眠随机时长后返回输入的平方
fn slow_square(x: u64) -> u64 {
    let delay = rand::thread_rng().gen_range(5..40);
    thread::sleep(Duration::from_millis(delay));
    x * x
}

/// 远程任务示例：提交、乱序取回、失败隔离、超时重试和 wait
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(&path).with_context(|| format!("读取配置 {} 失败", path))?,
        None => EngineConfig::with_workers(4),
    };
    let ctx = Context::open(config)?;
    println!("=== 远程任务示例，会话 {} ===", ctx.session_id());

    // 1. 批量提交并按逆序取回
    let square = RemoteFn::new(slow_square).named("slow_square");
    let start = Instant::now();
    let handles = square.submit_all(&ctx, 1..=12u64)?;
    let mut table = Table::new();
    table.add_row(row!["句柄", "输入", "结果"]);
    for (x, handle) in (1..=12u64).zip(handles.iter()).collect::<Vec<_>>().into_iter().rev() {
        let value = ctx.get(handle, Some(Duration::from_secs(5)))?;
        table.add_row(row![handle.id(), x, value]);
    }
    table.printstd();
    println!("12 个任务耗时 {:?}", start.elapsed());

    // 2. 单个任务失败只影响自己的句柄
    let divide = RemoteFn::fallible(|(a, b): (i64, i64)| {
        if b == 0 {
            Err(format!("{} / 0", a))
        } else {
            Ok(a / b)
        }
    })
    .named("divide")
    .with_priority(TaskPriority::High);
    let quotients = divide.submit_all(&ctx, vec![(10, 2), (7, 0), (9, 3)])?;
    let report = ctx.get_many(&quotients, Some(Duration::from_secs(5)));
    for (handle, result) in quotients.iter().zip(report.results.iter()) {
        match result {
            Ok(value) => println!("{} -> {}", handle.id(), value),
            Err(e) => println!("{} -> 失败: {}", handle.id(), e),
        }
    }

    // put 的值立即可读
    let offset = ctx.put(1000i64);
    println!("put -> {} (ready: {})", ctx.get(&offset, Some(Duration::ZERO))?, offset.is_ready());

    // 3. 超时不会改变句柄状态，之后仍可取回
    let slow = ctx.submit(|| {
        thread::sleep(Duration::from_millis(200));
        "slow done".to_string()
    })?;
    match ctx.get(&slow, Some(Duration::from_millis(10))) {
        Err(e @ Error::Timeout { .. }) => println!("首次读取: {} (可重试: {})", e, e.is_retryable()),
        other => println!("首次读取: {:?}", other.map(|_| ())),
    }
    println!("再次读取: {}", ctx.get(&slow, None)?);

    // 4. wait 取最先完成的两个
    let racers: Vec<_> = (0..5u64)
        .map(|i| ctx.submit(move || slow_square(i)))
        .collect::<task_runtime::Result<_>>()?;
    let (ready, pending) = ctx.wait(&racers, 2, None)?;
    println!("最先完成: {:?}，仍在等待: {}", ready.iter().map(|h| h.id()).collect::<Vec<_>>(), pending.len());

    ctx.close()?;
    let stats = ctx.stats();
    tracing::info!(completed = stats.completed, failed = stats.failed_tasks, "会话统计");
    println!("统计: {}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
