// object_store.rs
// 对象存储：句柄到结果的映射。每个句柄只写一次，支持带超时的阻塞读取、批量读取和 wait。
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::HandleId;

/// 类型擦除后的结果值
pub(crate) type Payload = Arc<dyn Any + Send + Sync>;

/// 句柄的终态
pub(crate) type Outcome = std::result::Result<Payload, Failure>;

/// 失败终态
#[derive(Debug, Clone)]
pub(crate) enum Failure {
    /// 任务体返回错误或panic
    Task(String),
    /// 任务在执行前被取消
    Cancelled,
}

/// 写一次的结果槽。解析后读取不需要加锁。
#[derive(Default)]
pub(crate) struct Slot {
    outcome: OnceLock<Outcome>,
}

impl Slot {
    fn get(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    fn is_resolved(&self) -> bool {
        self.outcome.get().is_some()
    }
}

/// 未携带类型信息的句柄，供工作线程回写结果
#[derive(Clone)]
pub(crate) struct RawRef {
    pub(crate) id: HandleId,
    slot: Arc<Slot>,
}

/// 指向一个（可能尚未计算出的）结果的类型化句柄
pub struct ObjectRef<T> {
    id: HandleId,
    store: Uuid,
    slot: Arc<Slot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectRef<T> {
    /// 句柄ID
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// 是否已进入终态（成功或失败）
    pub fn is_ready(&self) -> bool {
        self.slot.is_resolved()
    }

    pub(crate) fn raw(&self) -> RawRef {
        RawRef {
            id: self.id,
            slot: self.slot.clone(),
        }
    }
}

impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            store: self.store,
            slot: self.slot.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.id)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<T> PartialEq for ObjectRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.store == other.store
    }
}

impl<T> Eq for ObjectRef<T> {}

/// get_many 的结果：与输入句柄一一对应，未完成的句柄记为 Timeout
#[derive(Debug)]
pub struct GetManyReport<T> {
    pub results: Vec<Result<T>>,
}

impl<T> GetManyReport<T> {
    /// 已成功取得的值的数量
    pub fn ready_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// 截止时仍未完成的句柄数量
    pub fn pending_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, Err(Error::Timeout { .. })))
            .count()
    }

    /// 所有句柄都已进入终态
    pub fn is_complete(&self) -> bool {
        self.pending_count() == 0
    }

    /// 按输入顺序返回成功的值，失败和超时的位置为 None
    pub fn values(self) -> Vec<Option<T>> {
        self.results.into_iter().map(|r| r.ok()).collect()
    }
}

/// 每分配这么多个句柄清理一次已失效的索引项
const PRUNE_INTERVAL: u64 = 256;

/// 对象存储。句柄单写者、只解析一次；只有解析这一步需要同步。
/// 索引只持有弱引用，值的生命周期由句柄（以及尚未执行的任务）决定。
pub struct ObjectStore {
    id: Uuid,
    next_id: AtomicU64,
    slots: RwLock<HashMap<HandleId, Weak<Slot>>>,
    // 每次有句柄被解析时递增，配合 resolved 唤醒等待者
    generation: Mutex<u64>,
    resolved: Condvar,
}

impl ObjectStore {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            next_id: AtomicU64::new(1),
            slots: RwLock::new(HashMap::new()),
            generation: Mutex::new(0),
            resolved: Condvar::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 分配一个处于等待状态的新句柄
    pub(crate) fn allocate<T>(&self) -> ObjectRef<T> {
        let raw_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = HandleId::new(raw_id);
        let slot = Arc::new(Slot::default());
        let mut slots = self.slots.write();
        if raw_id % PRUNE_INTERVAL == 0 {
            slots.retain(|_, slot| slot.strong_count() > 0);
        }
        slots.insert(id, Arc::downgrade(&slot));
        drop(slots);
        ObjectRef {
            id,
            store: self.id,
            slot,
            _marker: PhantomData,
        }
    }

    /// 移除一个从未被提交出去的句柄
    pub(crate) fn discard(&self, id: HandleId) {
        self.slots.write().remove(&id);
    }

    /// 存入一个值，立即返回已解析的句柄
    pub fn put<T: Send + Sync + 'static>(&self, value: T) -> ObjectRef<T> {
        let handle = self.allocate();
        self.resolve(&handle.raw(), Ok(Arc::new(value)));
        handle
    }

    /// 将句柄解析为终态。重复解析会被拒绝并返回 false。
    pub(crate) fn resolve(&self, raw: &RawRef, outcome: Outcome) -> bool {
        if raw.slot.outcome.set(outcome).is_err() {
            tracing::warn!(handle = %raw.id, "句柄已解析，忽略重复写入");
            return false;
        }
        let mut generation = self.generation.lock();
        *generation += 1;
        self.resolved.notify_all();
        true
    }

    /// 阻塞直到句柄解析或超时。timeout 为 None 时无限等待。
    pub fn get<T: Clone + 'static>(&self, handle: &ObjectRef<T>, timeout: Option<Duration>) -> Result<T> {
        self.check_owner(handle)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        match self.wait_slot(&handle.slot, deadline) {
            Some(outcome) => Self::materialize(handle.id, outcome),
            None => Err(Error::Timeout { handle: handle.id }),
        }
    }

    /// 在同一个截止时间内尽可能多地取回结果，部分结果照常返回
    pub fn get_many<T: Clone + 'static>(
        &self,
        handles: &[ObjectRef<T>],
        timeout: Option<Duration>,
    ) -> GetManyReport<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let results = handles
            .iter()
            .map(|handle| {
                self.check_owner(handle)?;
                match self.wait_slot(&handle.slot, deadline) {
                    Some(outcome) => Self::materialize(handle.id, outcome),
                    None => Err(Error::Timeout { handle: handle.id }),
                }
            })
            .collect();
        GetManyReport { results }
    }

    /// 等待至少 num_returns 个句柄进入终态或超时，返回 (已完成, 未完成)，均保持输入顺序
    pub fn wait<T>(
        &self,
        handles: &[ObjectRef<T>],
        num_returns: usize,
        timeout: Option<Duration>,
    ) -> Result<(Vec<ObjectRef<T>>, Vec<ObjectRef<T>>)> {
        if num_returns > handles.len() {
            return Err(Error::InvalidArgument(format!(
                "num_returns {} 超过句柄数量 {}",
                num_returns,
                handles.len()
            )));
        }
        for handle in handles {
            self.check_owner(handle)?;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let ready_count = || handles.iter().filter(|h| h.is_ready()).count();
        if ready_count() < num_returns {
            let mut generation = self.generation.lock();
            while ready_count() < num_returns {
                match deadline {
                    Some(deadline) => {
                        if self.resolved.wait_until(&mut generation, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.resolved.wait(&mut generation),
                }
            }
        }

        let mut ready = Vec::new();
        let mut pending = Vec::new();
        for handle in handles {
            if handle.is_ready() && ready.len() < num_returns {
                ready.push(handle.clone());
            } else {
                pending.push(handle.clone());
            }
        }
        Ok((ready, pending))
    }

    /// 按ID查询句柄是否已解析。所有引用都已释放的句柄视为未知。
    pub fn is_ready(&self, id: HandleId) -> Result<bool> {
        self.slots
            .read()
            .get(&id)
            .and_then(Weak::upgrade)
            .map(|slot| slot.is_resolved())
            .ok_or(Error::UnknownHandle { handle: id })
    }

    /// 仍被引用的句柄数量
    pub fn len(&self) -> usize {
        self.slots.read().values().filter(|slot| slot.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 尚未解析的句柄数量
    pub fn pending_count(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|slot| !slot.is_resolved())
            .count()
    }

    pub(crate) fn owns<T>(&self, handle: &ObjectRef<T>) -> bool {
        handle.store == self.id
    }

    fn check_owner<T>(&self, handle: &ObjectRef<T>) -> Result<()> {
        if !self.owns(handle) {
            return Err(Error::UnknownHandle { handle: handle.id });
        }
        Ok(())
    }

    fn wait_slot<'a>(&self, slot: &'a Slot, deadline: Option<Instant>) -> Option<&'a Outcome> {
        if let Some(outcome) = slot.get() {
            return Some(outcome);
        }
        let mut generation = self.generation.lock();
        loop {
            if let Some(outcome) = slot.get() {
                return Some(outcome);
            }
            match deadline {
                Some(deadline) => {
                    if self.resolved.wait_until(&mut generation, deadline).timed_out() {
                        return slot.get();
                    }
                }
                None => self.resolved.wait(&mut generation),
            }
        }
    }

    fn materialize<T: Clone + 'static>(id: HandleId, outcome: &Outcome) -> Result<T> {
        match outcome {
            Ok(payload) => payload
                .downcast_ref::<T>()
                .cloned()
                .ok_or(Error::TypeMismatch { handle: id }),
            Err(Failure::Task(message)) => Err(Error::TaskFailure {
                handle: id,
                message: message.clone(),
            }),
            Err(Failure::Cancelled) => Err(Error::Cancelled { handle: id }),
        }
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}
