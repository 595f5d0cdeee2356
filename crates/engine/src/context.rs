// context.rs
// 会话上下文：显式打开/关闭的引擎会话，持有对象存储和工作线程池，所有操作都通过它进行。
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::object_store::{GetManyReport, ObjectRef, ObjectStore};
use crate::parallel_iter::ParallelIterator;
use crate::pool::{PoolStats, WorkerPool};
use crate::remote::{once_job, short_type_name, RemoteOptions};
use crate::task::{Job, Task};
use crate::types::HandleId;

/// 一个引擎会话。丢弃时自动关闭。
pub struct Context {
    session_id: Uuid,
    config: EngineConfig,
    store: Arc<ObjectStore>,
    pool: WorkerPool,
}

impl Context {
    /// 打开会话：校验配置、创建对象存储并启动工作线程
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let session_id = Uuid::new_v4();
        let store = Arc::new(ObjectStore::new(session_id));
        let pool = WorkerPool::start(&config, store.clone())?;
        tracing::info!(session = %session_id, workers = config.num_workers, "会话已打开");
        Ok(Self {
            session_id,
            config,
            store,
            pool,
        })
    }

    /// 使用默认配置打开会话
    pub fn open_default() -> Result<Self> {
        Self::open(EngineConfig::default())
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// 提交一个闭包，立即返回结果句柄
    pub fn submit<F, R>(&self, func: F) -> Result<ObjectRef<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        let job = once_job(move || Ok::<R, std::convert::Infallible>(func()));
        self.submit_job(&short_type_name::<F>(), RemoteOptions::default(), job)
    }

    /// 提交一个返回 Result 的闭包，Err 会作为 TaskFailure 挂到句柄上
    pub fn submit_result<F, R, E>(&self, func: F) -> Result<ObjectRef<R>>
    where
        F: FnOnce() -> std::result::Result<R, E> + Send + 'static,
        R: Send + Sync + 'static,
        E: fmt::Display,
    {
        self.submit_job(&short_type_name::<F>(), RemoteOptions::default(), once_job(func))
    }

    pub(crate) fn submit_job<R>(&self, name: &str, options: RemoteOptions, job: Job) -> Result<ObjectRef<R>> {
        let handle = self.store.allocate::<R>();
        let task = Task::new(name, handle.raw(), job)
            .with_priority(options.priority)
            .with_max_retries(options.max_retries);
        if let Err(e) = self.pool.submit(task) {
            self.store.discard(handle.id());
            return Err(e);
        }
        Ok(handle)
    }

    /// 存入一个值，立即返回已解析的句柄
    pub fn put<T: Send + Sync + 'static>(&self, value: T) -> ObjectRef<T> {
        self.store.put(value)
    }

    /// 阻塞读取结果；超时返回 Timeout，句柄保持等待状态，可以重试
    pub fn get<T: Clone + 'static>(&self, handle: &ObjectRef<T>, timeout: Option<Duration>) -> Result<T> {
        self.store.get(handle, timeout)
    }

    /// 共享一个截止时间读取多个结果，部分结果照常返回
    pub fn get_many<T: Clone + 'static>(
        &self,
        handles: &[ObjectRef<T>],
        timeout: Option<Duration>,
    ) -> GetManyReport<T> {
        self.store.get_many(handles, timeout)
    }

    /// 等待至少 num_returns 个句柄完成，返回 (已完成, 未完成)
    pub fn wait<T>(
        &self,
        handles: &[ObjectRef<T>],
        num_returns: usize,
        timeout: Option<Duration>,
    ) -> Result<(Vec<ObjectRef<T>>, Vec<ObjectRef<T>>)> {
        self.store.wait(handles, num_returns, timeout)
    }

    /// 尽力取消：只有尚未开始的任务会被移出队列
    pub fn cancel<T>(&self, handle: &ObjectRef<T>) -> bool {
        self.store.owns(handle) && self.pool.cancel(handle.id())
    }

    pub fn is_ready(&self, id: HandleId) -> Result<bool> {
        self.store.is_ready(id)
    }

    /// 按会话配置构造分片并行迭代器（轮转分片）
    pub fn parallel_iter<T: Send + 'static>(&self, items: Vec<T>, num_shards: usize) -> Result<ParallelIterator<T>> {
        Ok(ParallelIterator::from_items(items, num_shards)?.with_channel_capacity(self.config.gather_channel_capacity))
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// 关闭会话：不再接受新任务，已入队任务执行完毕后返回。可重复调用。
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.pool.shutdown()?;
        tracing::info!(session = %self.session_id, "会话已关闭");
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}
