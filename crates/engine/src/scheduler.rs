use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::config::BackpressurePolicy;
use crate::error::{Error, Result};
use crate::task::{Task, TaskPriority};
use crate::types::HandleId;

const PRIORITY_LEVELS: usize = 3;

struct QueueState {
    /// 按优先级分桶的任务队列，下标即 TaskPriority 的序号
    queues: [VecDeque<Task>; PRIORITY_LEVELS],
    len: usize,
    closed: bool,
}

impl QueueState {
    fn pop(&mut self) -> Option<Task> {
        let task = self.queues.iter_mut().rev().find_map(|q| q.pop_front())?;
        self.len -= 1;
        Some(task)
    }
}

/// 有界任务队列：同优先级FIFO，高优先级先出，队列满时按策略阻塞或拒绝
pub struct TaskScheduler {
    capacity: usize,
    policy: BackpressurePolicy,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl TaskScheduler {
    /// 创建新的调度器实例
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            capacity,
            policy,
            state: Mutex::new(QueueState {
                queues: Default::default(),
                len: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// 提交一个新任务到队列
    pub fn submit_task(&self, task: Task) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Error::SessionClosed);
            }
            if state.len < self.capacity {
                break;
            }
            match self.policy {
                BackpressurePolicy::FailFast => {
                    return Err(Error::PoolExhausted {
                        capacity: self.capacity,
                    })
                }
                BackpressurePolicy::Block => self.not_full.wait(&mut state),
            }
        }
        state.queues[priority_index(task.priority)].push_back(task);
        state.len += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    /// 获取下一个待执行任务，队列为空时阻塞；队列关闭且为空时返回 None
    pub fn fetch_next_task(&self) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.pop() {
                self.not_full.notify_one();
                return Some(task);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// 非阻塞地获取下一个任务
    pub fn try_fetch_next_task(&self) -> Option<Task> {
        let mut state = self.state.lock();
        let task = state.pop()?;
        self.not_full.notify_one();
        Some(task)
    }

    /// 从队列中移除尚未开始的任务
    pub fn cancel(&self, handle: HandleId) -> Option<Task> {
        let mut state = self.state.lock();
        let task = state.queues.iter_mut().find_map(|queue| {
            let pos = queue.iter().position(|task| task.handle() == handle)?;
            queue.remove(pos)
        })?;
        state.len -= 1;
        self.not_full.notify_one();
        Some(task)
    }

    /// 关闭队列：拒绝新任务，已入队的任务仍会被取出
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn priority_index(priority: TaskPriority) -> usize {
    match priority {
        TaskPriority::Low => 0,
        TaskPriority::Normal => 1,
        TaskPriority::High => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{ObjectStore, Payload};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use uuid::Uuid;

    fn make_task(store: &ObjectStore, name: &str, priority: TaskPriority) -> Task {
        let handle = store.allocate::<()>();
        Task::new(name, handle.raw(), Box::new(|| -> std::result::Result<Payload, String> { Ok(Arc::new(())) })).with_priority(priority)
    }

    #[test]
    fn test_fifo_within_priority() {
        let store = ObjectStore::new(Uuid::new_v4());
        let scheduler = TaskScheduler::new(8, BackpressurePolicy::FailFast);
        for name in ["a", "b", "c"] {
            scheduler.submit_task(make_task(&store, name, TaskPriority::Normal)).unwrap();
        }
        let order: Vec<String> = std::iter::from_fn(|| scheduler.try_fetch_next_task())
            .map(|t| t.name)
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_higher_priority_first() {
        let store = ObjectStore::new(Uuid::new_v4());
        let scheduler = TaskScheduler::new(8, BackpressurePolicy::FailFast);
        scheduler.submit_task(make_task(&store, "low", TaskPriority::Low)).unwrap();
        scheduler.submit_task(make_task(&store, "normal", TaskPriority::Normal)).unwrap();
        scheduler.submit_task(make_task(&store, "high", TaskPriority::High)).unwrap();
        let order: Vec<String> = std::iter::from_fn(|| scheduler.try_fetch_next_task())
            .map(|t| t.name)
            .collect();
        assert_eq!(order, vec!["high", "normal", "low"]);
    }

    #[test]
    fn test_fail_fast_backpressure() {
        let store = ObjectStore::new(Uuid::new_v4());
        let scheduler = TaskScheduler::new(1, BackpressurePolicy::FailFast);
        scheduler.submit_task(make_task(&store, "a", TaskPriority::Normal)).unwrap();
        assert_eq!(scheduler.capacity(), 1);
        assert!(!scheduler.is_empty());
        let err = scheduler.submit_task(make_task(&store, "b", TaskPriority::Normal)).unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { capacity: 1 }));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_block_backpressure_waits_for_space() {
        let store = ObjectStore::new(Uuid::new_v4());
        let scheduler = Arc::new(TaskScheduler::new(1, BackpressurePolicy::Block));
        scheduler.submit_task(make_task(&store, "a", TaskPriority::Normal)).unwrap();

        let consumer = {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                scheduler.fetch_next_task().map(|t| t.name)
            })
        };
        scheduler.submit_task(make_task(&store, "b", TaskPriority::Normal)).unwrap();
        assert_eq!(consumer.join().unwrap().as_deref(), Some("a"));
        assert_eq!(scheduler.try_fetch_next_task().map(|t| t.name).as_deref(), Some("b"));
    }

    #[test]
    fn test_cancel_and_close() {
        let store = ObjectStore::new(Uuid::new_v4());
        let scheduler = TaskScheduler::new(4, BackpressurePolicy::Block);
        let task = make_task(&store, "a", TaskPriority::Normal);
        let handle = task.handle();
        scheduler.submit_task(task).unwrap();
        scheduler.submit_task(make_task(&store, "b", TaskPriority::Normal)).unwrap();

        assert_eq!(scheduler.cancel(handle).map(|t| t.name).as_deref(), Some("a"));
        assert!(scheduler.cancel(handle).is_none());

        scheduler.close();
        assert!(matches!(
            scheduler.submit_task(make_task(&store, "c", TaskPriority::Normal)),
            Err(Error::SessionClosed)
        ));
        // 关闭后仍能取出已入队的任务，取空后返回 None
        assert_eq!(scheduler.fetch_next_task().map(|t| t.name).as_deref(), Some("b"));
        assert!(scheduler.fetch_next_task().is_none());
    }
}
