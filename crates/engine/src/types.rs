// types.rs
// 定义通用类型，如对象句柄ID、各项默认参数常量等辅助类型。
use std::fmt;

use serde::{Deserialize, Serialize};

/// 对象句柄ID，在单个对象存储内单调递增、唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandleId(u64);

impl HandleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{:06}", self.0)
    }
}

// 常量定义，避免硬编码
pub const DEFAULT_NUM_WORKERS: usize = 4;
pub const DEFAULT_MAX_BACKLOG: usize = 1024;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub const DEFAULT_GATHER_CHANNEL_CAPACITY: usize = 16;
