// pool.rs
// 工作线程池：固定数量的工作线程从调度队列取任务执行，支持取消、统计和优雅关闭。
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::object_store::{Failure, ObjectStore};
use crate::scheduler::TaskScheduler;
use crate::task::Task;
use crate::task_executor::TaskExecutor;
use crate::types::HandleId;
use crate::worker::{self, WorkerState};

/// 线程池运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub workers: usize,
    pub idle: usize,
    pub running: usize,
    pub failed: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed_tasks: u64,
    pub restarts: u64,
}

/// 工作线程之间共享的状态
pub(crate) struct PoolShared {
    pub(crate) scheduler: TaskScheduler,
    pub(crate) store: Arc<ObjectStore>,
    pub(crate) executor: TaskExecutor,
    states: Vec<Mutex<WorkerState>>,
    completed: AtomicU64,
    failed_tasks: AtomicU64,
    restarts: AtomicU64,
}

impl PoolShared {
    pub(crate) fn set_state(&self, index: usize, state: WorkerState) {
        *self.states[index].lock() = state;
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// 按配置启动工作线程
    pub fn start(config: &EngineConfig, store: Arc<ObjectStore>) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(PoolShared {
            scheduler: TaskScheduler::new(config.max_backlog, config.backpressure),
            store,
            executor: TaskExecutor::new(Duration::from_millis(config.retry_backoff_ms)),
            states: (0..config.num_workers).map(|_| Mutex::new(WorkerState::Idle)).collect(),
            completed: AtomicU64::new(0),
            failed_tasks: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        });

        let pool = Self {
            shared: shared.clone(),
            handles: Mutex::new(Vec::with_capacity(config.num_workers)),
        };
        for index in 0..config.num_workers {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("engine-worker-{}", index))
                .spawn(move || worker::run(index, shared))?;
            pool.handles.lock().push(handle);
        }
        tracing::info!(
            workers = config.num_workers,
            backlog = config.max_backlog,
            policy = ?config.backpressure,
            "线程池已启动"
        );
        Ok(pool)
    }

    /// 提交任务，队列满时按背压策略阻塞或返回 PoolExhausted
    pub fn submit(&self, task: Task) -> Result<()> {
        tracing::debug!(task = %task.name, handle = %task.handle(), priority = ?task.priority, "提交任务");
        self.shared.scheduler.submit_task(task)
    }

    /// 取消尚未开始的任务，其句柄解析为 Cancelled。已开始或已结束的任务返回 false。
    pub fn cancel(&self, handle: HandleId) -> bool {
        match self.shared.scheduler.cancel(handle) {
            Some(task) => {
                self.shared.store.resolve(&task.target, Err(Failure::Cancelled));
                tracing::debug!(handle = %handle, "任务已取消");
                true
            }
            None => false,
        }
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared.states.iter().map(|s| *s.lock()).collect()
    }

    pub fn stats(&self) -> PoolStats {
        let states = self.worker_states();
        let count = |wanted: WorkerState| states.iter().filter(|s| **s == wanted).count();
        PoolStats {
            workers: states.len(),
            idle: count(WorkerState::Idle),
            running: count(WorkerState::Running),
            failed: count(WorkerState::Failed),
            queued: self.shared.scheduler.len(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed_tasks: self.shared.failed_tasks.load(Ordering::Relaxed),
            restarts: self.shared.restarts.load(Ordering::Relaxed),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.scheduler.is_closed()
    }

    /// 停止接收新任务，等待已入队任务执行完毕后回收所有工作线程
    pub fn shutdown(&self) -> Result<()> {
        self.shared.scheduler.close();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return Ok(());
        }
        let mut lost = 0;
        for handle in handles {
            if handle.join().is_err() {
                lost += 1;
            }
        }
        tracing::info!(stats = ?self.stats(), "线程池已关闭");
        if lost > 0 {
            return Err(Error::Io(std::io::Error::other(format!("{} 个工作线程异常退出", lost))));
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "关闭线程池时出错");
        }
    }
}
