// task_splitter.rs
// 任务拆分器，负责将输入序列按轮转或分块策略拆分为多个互不相交的分片。
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parallel_iter::Shard;

/// 分片策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitStrategy {
    /// 轮转：第i个元素进入第 i % n 个分片
    #[default]
    RoundRobin,
    /// 分块：连续切分，前 len % n 个分片各多分一个元素
    Block,
}

/// 任务拆分器，拆分结果保持元素总数不变，分片内保持原有顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSplitter {
    pub num_shards: usize,
    pub strategy: SplitStrategy,
}

impl TaskSplitter {
    /// 创建新的任务拆分器，分片数必须大于0
    pub fn new(num_shards: usize, strategy: SplitStrategy) -> Result<Self> {
        if num_shards == 0 {
            return Err(Error::InvalidArgument("分片数必须大于 0".to_string()));
        }
        Ok(Self {
            num_shards,
            strategy,
        })
    }

    /// 拆分输入序列
    pub fn split<T>(&self, items: Vec<T>) -> Vec<Vec<T>> {
        let parts = match self.strategy {
            SplitStrategy::RoundRobin => self.split_round_robin(items),
            SplitStrategy::Block => self.split_by_block(items),
        };
        tracing::debug!(
            shards = self.num_shards,
            strategy = ?self.strategy,
            sizes = ?parts.iter().map(Vec::len).collect::<Vec<_>>(),
            "序列拆分完成"
        );
        parts
    }

    /// 各分片的元素个数
    pub fn shard_sizes(&self, total: usize) -> Vec<usize> {
        let base = total / self.num_shards;
        let extra = total % self.num_shards;
        (0..self.num_shards)
            .map(|i| if i < extra { base + 1 } else { base })
            .collect()
    }

    fn split_round_robin<T>(&self, items: Vec<T>) -> Vec<Vec<T>> {
        let mut parts: Vec<Vec<T>> = self
            .shard_sizes(items.len())
            .into_iter()
            .map(Vec::with_capacity)
            .collect();
        for (i, item) in items.into_iter().enumerate() {
            parts[i % self.num_shards].push(item);
        }
        parts
    }

    fn split_by_block<T>(&self, items: Vec<T>) -> Vec<Vec<T>> {
        let mut iter = items.into_iter();
        self.shard_sizes(iter.len())
            .into_iter()
            .map(|size| iter.by_ref().take(size).collect())
            .collect()
    }
}

/// 将序列拆分为 n 个可独立消费的分片
pub fn shard<T: Send + 'static>(items: Vec<T>, num_shards: usize, strategy: SplitStrategy) -> Result<Vec<Shard<T>>> {
    let splitter = TaskSplitter::new(num_shards, strategy)?;
    Ok(splitter
        .split(items)
        .into_iter()
        .enumerate()
        .map(|(index, part)| Shard::new(index, part))
        .collect())
}
