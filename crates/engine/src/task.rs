use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object_store::{Payload, RawRef};
use crate::types::HandleId;

/// 任务状态枚举，描述任务的生命周期
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// 等待执行
    Pending,
    /// 正在执行
    Running,
    /// 已完成
    Completed,
    /// 执行失败，包含失败原因
    Failed(String),
    /// 执行前被取消
    Cancelled,
}

impl TaskStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed(_) | TaskStatus::Cancelled)
    }
}

/// 任务优先级，同一优先级内按提交顺序（FIFO）调度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// 任务体：每次调用执行一次尝试，返回类型擦除后的结果或错误信息
pub(crate) type Job = Box<dyn FnMut() -> std::result::Result<Payload, String> + Send>;

/// 一个待执行的任务：函数引用 + 参数快照，结果写回目标句柄
pub struct Task {
    /// 任务名，用于日志
    pub name: String,
    /// 优先级
    pub priority: TaskPriority,
    /// 失败后的最大重试次数
    pub max_retries: u32,
    /// 当前任务状态
    pub status: TaskStatus,
    pub(crate) target: RawRef,
    pub(crate) job: Job,
}

impl Task {
    pub(crate) fn new(name: impl Into<String>, target: RawRef, job: Job) -> Self {
        Self {
            name: name.into(),
            priority: TaskPriority::Normal,
            max_retries: 0,
            status: TaskStatus::Pending,
            target,
            job,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 结果句柄ID
    pub fn handle(&self) -> HandleId {
        self.target.id
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("handle", &self.target.id)
            .field("priority", &self.priority)
            .field("max_retries", &self.max_retries)
            .field("status", &self.status)
            .finish()
    }
}
