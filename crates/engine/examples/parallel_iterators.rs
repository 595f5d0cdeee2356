use std::thread;
use std::time::Duration;

use task_runtime::{Context, EngineConfig, ParallelIterator, SplitStrategy};
use prettytable::{row, Table};
use rand::Rng;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ctx = Context::open(EngineConfig::default())?;
    println!("=== 分片并行迭代器示例 ===");

    // 同步汇聚：轮转交织，顺序确定
    let words = vec!["alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta"];
    let lengths: Vec<(&str, usize)> = ctx
        .parallel_iter(words, 3)?
        .for_each(|w| (w, w.len()))
        .gather_sync()
        .collect();
    println!("gather_sync: {:?}", lengths);

    // 两种分片策略的分片内容
    let mut table = Table::new();
    table.add_row(row!["策略", "分片", "元素"]);
    for strategy in [SplitStrategy::RoundRobin, SplitStrategy::Block] {
        let iter = ParallelIterator::from_items_with((0..10).collect::<Vec<u32>>(), 3, strategy)?;
        for shard in iter.into_shards() {
            let index = shard.index();
            table.add_row(row![format!("{:?}", strategy), index, format!("{:?}", shard.collect::<Vec<_>>())]);
        }
    }
    table.printstd();

    // 过滤后分批
    let batches: Vec<Vec<u32>> = ParallelIterator::from_range(30, 2)?
        .filter(|x| x % 2 == 1)
        .for_each(|x| x as u32)
        .batch(4)
        .gather_sync()
        .collect();
    println!("奇数分批: {:?}", batches);

    // 异步汇聚：各分片由独立线程驱动，慢分片不拖住快分片
    let arrivals: Vec<(usize, u64)> = ctx
        .parallel_iter((0..12u64).collect(), 4)?
        .for_each(|x| {
            let delay = rand::thread_rng().gen_range(1..30);
            thread::sleep(Duration::from_millis(delay));
            ((x % 4) as usize, x)
        })
        .gather_async()?
        .collect();
    println!("gather_async 到达顺序: {:?}", arrivals);

    // 只取单个分片
    let shard = ParallelIterator::from_range(9, 3)?.get_shard(2)?;
    println!("分片 {}: {:?}", shard.index(), shard.collect::<Vec<_>>());

    ctx.close()?;
    Ok(())
}
