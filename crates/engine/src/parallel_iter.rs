// parallel_iter.rs
// 分片并行迭代器：每个分片独立惰性消费，可叠加逐元素变换，
// 再以同步（确定性轮转交织）或异步（谁先产出谁先返回）的方式汇聚成一个序列。
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::task_splitter::{shard, SplitStrategy};
use crate::types::DEFAULT_GATHER_CHANNEL_CAPACITY;

type ShardIter<T> = Box<dyn Iterator<Item = T> + Send>;

/// 生产线程发往汇聚端的消息
enum Produced<T> {
    Item(T),
    /// 分片变换panic，载荷交给消费线程重新抛出
    Panicked(Box<dyn Any + Send>),
}

/// 一个分片：有序、私有游标，同一时间只能被一个消费者持有
pub struct Shard<T> {
    index: usize,
    iter: ShardIter<T>,
}

impl<T: Send + 'static> Shard<T> {
    pub fn new(index: usize, items: Vec<T>) -> Self {
        Self {
            index,
            iter: Box::new(items.into_iter()),
        }
    }
}

impl<T> Shard<T> {
    pub fn index(&self) -> usize {
        self.index
    }

    fn map_iter<U, F>(self, f: F) -> Shard<U>
    where
        F: FnOnce(ShardIter<T>) -> ShardIter<U>,
    {
        Shard {
            index: self.index,
            iter: f(self.iter),
        }
    }
}

impl<T> Iterator for Shard<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.iter.next()
    }
}

impl<T> fmt::Debug for Shard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard").field("index", &self.index).finish()
    }
}

/// 由若干分片组成的并行迭代器。变换是惰性的，只在汇聚时逐元素执行。
pub struct ParallelIterator<T> {
    shards: Vec<Shard<T>>,
    channel_capacity: usize,
}

impl ParallelIterator<usize> {
    /// 以 0..n 构造，按轮转方式分片
    pub fn from_range(n: usize, num_shards: usize) -> Result<Self> {
        Self::from_items((0..n).collect(), num_shards)
    }
}

impl<T: Send + 'static> ParallelIterator<T> {
    /// 按轮转方式分片
    pub fn from_items(items: Vec<T>, num_shards: usize) -> Result<Self> {
        Self::from_items_with(items, num_shards, SplitStrategy::RoundRobin)
    }

    pub fn from_items_with(items: Vec<T>, num_shards: usize, strategy: SplitStrategy) -> Result<Self> {
        Ok(Self::from_shards(shard(items, num_shards, strategy)?))
    }

    pub fn from_shards(shards: Vec<Shard<T>>) -> Self {
        Self {
            shards,
            channel_capacity: DEFAULT_GATHER_CHANNEL_CAPACITY,
        }
    }

    /// 异步汇聚时共享通道的容量
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// 为每个分片叠加一个逐元素变换，拉取一个元素时执行一次
    pub fn for_each<U, F>(self, f: F) -> ParallelIterator<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.transform(|iter| -> ShardIter<U> {
            let f = f.clone();
            Box::new(iter.map(move |item| f(item)))
        })
    }

    /// 只保留满足条件的元素
    pub fn filter<F>(self, predicate: F) -> ParallelIterator<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.transform(|iter| -> ShardIter<T> {
            let predicate = predicate.clone();
            Box::new(iter.filter(move |item| predicate(item)))
        })
    }

    /// 将每个分片内的连续元素按 size 个一组打包，最后一组可能不足 size
    pub fn batch(self, size: usize) -> ParallelIterator<Vec<T>> {
        let size = size.max(1);
        self.transform(move |mut iter| -> ShardIter<Vec<T>> {
            Box::new(std::iter::from_fn(move || {
                let batch: Vec<T> = iter.by_ref().take(size).collect();
                if batch.is_empty() {
                    None
                } else {
                    Some(batch)
                }
            }))
        })
    }

    /// 取出单个分片，其余分片被丢弃
    pub fn get_shard(self, index: usize) -> Result<Shard<T>> {
        let num_shards = self.shards.len();
        self.shards
            .into_iter()
            .nth(index)
            .ok_or_else(|| Error::InvalidArgument(format!("分片下标 {} 超出范围 [0, {})", index, num_shards)))
    }

    pub fn into_shards(self) -> Vec<Shard<T>> {
        self.shards
    }

    /// 同步汇聚：按分片顺序轮流阻塞拉取，跳过已耗尽的分片，交织顺序确定
    pub fn gather_sync(self) -> GatherSync<T> {
        GatherSync {
            shards: self.shards.into(),
        }
    }

    /// 异步汇聚：每个分片由独立的生产线程驱动，哪个分片先产出就先返回。
    /// 任一分片的变换panic时，panic会在消费线程的 next 中重新抛出，与 gather_sync 一致。
    pub fn gather_async(self) -> Result<GatherAsync<T>> {
        let (sender, receiver) = mpsc::sync_channel(self.channel_capacity);
        let mut producers = Vec::with_capacity(self.shards.len());
        for shard in self.shards {
            let sender = sender.clone();
            let index = shard.index();
            let producer = thread::Builder::new()
                .name(format!("shard-producer-{}", index))
                .spawn(move || {
                    let drained = panic::catch_unwind(AssertUnwindSafe(|| {
                        for item in shard {
                            if sender.send(Produced::Item(item)).is_err() {
                                break;
                            }
                        }
                    }));
                    if let Err(payload) = drained {
                        tracing::warn!(shard = index, "分片变换panic");
                        let _ = sender.send(Produced::Panicked(payload));
                    }
                })?;
            producers.push(producer);
        }
        Ok(GatherAsync {
            receiver: Some(receiver),
            producers,
        })
    }

    fn transform<U, F>(self, mut f: F) -> ParallelIterator<U>
    where
        F: FnMut(ShardIter<T>) -> ShardIter<U>,
    {
        ParallelIterator {
            shards: self.shards.into_iter().map(|shard| shard.map_iter(&mut f)).collect(),
            channel_capacity: self.channel_capacity,
        }
    }
}

impl<T> fmt::Debug for ParallelIterator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelIterator")
            .field("num_shards", &self.shards.len())
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

/// 同步汇聚得到的惰性序列，只能通过重新构造来重新开始
pub struct GatherSync<T> {
    shards: VecDeque<Shard<T>>,
}

impl<T> Iterator for GatherSync<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while let Some(mut shard) = self.shards.pop_front() {
            if let Some(item) = shard.next() {
                self.shards.push_back(shard);
                return Some(item);
            }
        }
        None
    }
}

/// 异步汇聚得到的惰性序列。丢弃时通知生产线程停止并回收它们。
pub struct GatherAsync<T> {
    receiver: Option<Receiver<Produced<T>>>,
    producers: Vec<JoinHandle<()>>,
}

impl<T> Iterator for GatherAsync<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.receiver.as_ref()?.recv().ok()? {
            Produced::Item(item) => Some(item),
            Produced::Panicked(payload) => {
                self.shutdown();
                panic::resume_unwind(payload)
            }
        }
    }
}

impl<T> GatherAsync<T> {
    fn shutdown(&mut self) {
        // 先关闭接收端，阻塞在 send 上的生产线程才会退出
        self.receiver.take();
        for producer in self.producers.drain(..) {
            let _ = producer.join();
        }
    }
}

impl<T> Drop for GatherAsync<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_gather_sync_round_robin() {
        let iter = ParallelIterator::from_items(vec![1, 2, 3, 4, 5], 2).unwrap();
        assert_eq!(iter.gather_sync().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_gather_sync_skips_exhausted_shards() {
        let shards = vec![Shard::new(0, vec!['a']), Shard::new(1, vec![]), Shard::new(2, vec!['b', 'c', 'd'])];
        let gathered: String = ParallelIterator::from_shards(shards).gather_sync().collect();
        assert_eq!(gathered, "abcd");
    }

    #[test]
    fn test_for_each_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let iter = ParallelIterator::from_range(10, 3).unwrap().for_each(move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            x * 2
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut gathered = iter.gather_sync();
        assert_eq!(gathered.next(), Some(0));
        assert_eq!(gathered.next(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_filter_and_batch() {
        let batches: Vec<Vec<usize>> = ParallelIterator::from_range(12, 2)
            .unwrap()
            .filter(|x| x % 3 != 0)
            .batch(2)
            .gather_sync()
            .collect();
        // 分片0: 0 2 4 6 8 10 -> 2 4 8 10；分片1: 1 3 5 7 9 11 -> 1 5 7 11
        assert_eq!(batches, vec![vec![2, 4], vec![1, 5], vec![8, 10], vec![7, 11]]);
    }

    #[test]
    fn test_get_shard() {
        let iter = ParallelIterator::from_items(vec![1, 2, 3, 4, 5], 2).unwrap();
        assert_eq!(iter.num_shards(), 2);
        let shard = iter.get_shard(1).unwrap();
        assert_eq!(shard.index(), 1);
        assert_eq!(shard.collect::<Vec<_>>(), vec![2, 4]);

        let iter = ParallelIterator::from_items(vec![1], 1).unwrap();
        assert!(matches!(iter.get_shard(3), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_gather_async_preserves_order_within_shard() {
        let iter = ParallelIterator::from_range(100, 4)
            .unwrap()
            .for_each(|x| (x % 4, x))
            .with_channel_capacity(2);
        let mut per_shard: HashMap<usize, Vec<usize>> = HashMap::new();
        for (shard, value) in iter.gather_async().unwrap() {
            per_shard.entry(shard).or_default().push(value);
        }
        assert_eq!(per_shard.len(), 4);
        for (shard, values) in per_shard {
            let expected: Vec<usize> = (0..100).filter(|x| x % 4 == shard).collect();
            assert_eq!(values, expected);
        }
    }

    #[test]
    fn test_transform_panic_reaches_consumer() {
        let failing = || {
            ParallelIterator::from_items((0..10).collect::<Vec<u32>>(), 2)
                .unwrap()
                .for_each(|x| if x == 2 { panic!("坏元素 {}", x) } else { x })
        };

        let gathered = panic::catch_unwind(AssertUnwindSafe(|| failing().gather_async().unwrap().collect::<Vec<_>>()));
        let payload = gathered.unwrap_err();
        assert_eq!(payload.downcast_ref::<String>().map(String::as_str), Some("坏元素 2"));

        let gathered = panic::catch_unwind(AssertUnwindSafe(|| failing().gather_sync().collect::<Vec<_>>()));
        assert!(gathered.is_err());
    }

    #[test]
    fn test_gather_async_drop_stops_producers() {
        let iter = ParallelIterator::from_range(10_000, 2).unwrap().with_channel_capacity(1);
        let mut gathered = iter.gather_async().unwrap();
        assert!(gathered.next().is_some());
        drop(gathered);
    }
}
