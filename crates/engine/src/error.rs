// error.rs
// 定义任务引擎通用的错误类型（超时、任务失败、队列满、会话关闭等）和Result类型。
use std::io;

use thiserror::Error;

use crate::types::HandleId;

/// 任务引擎通用错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// 获取结果超时，句柄仍处于等待状态，可以重试
    #[error("获取结果超时: {handle}")]
    Timeout { handle: HandleId },

    /// 任务体返回错误或发生panic，错误只挂在该任务自己的句柄上
    #[error("任务执行失败 {handle}: {message}")]
    TaskFailure { handle: HandleId, message: String },

    /// 等待队列已满（FailFast 背压策略）
    #[error("任务队列已满，容量 {capacity}")]
    PoolExhausted { capacity: usize },

    /// 任务在开始执行前被取消
    #[error("任务已取消: {handle}")]
    Cancelled { handle: HandleId },

    /// 会话已关闭，不再接受新任务
    #[error("会话已关闭")]
    SessionClosed,

    /// 句柄不属于当前对象存储
    #[error("未知句柄: {handle}")]
    UnknownHandle { handle: HandleId },

    /// 存储的值类型与句柄声明的类型不一致
    #[error("句柄 {handle} 的值类型不匹配")]
    TypeMismatch { handle: HandleId },

    /// 参数非法
    #[error("参数错误: {0}")]
    InvalidArgument(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),
}

/// 通用结果类型
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 调用方可以原样重试的错误：超时与队列满
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::PoolExhausted { .. })
    }

    /// 错误关联的句柄（如果有）
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            Error::Timeout { handle }
            | Error::TaskFailure { handle, .. }
            | Error::Cancelled { handle }
            | Error::UnknownHandle { handle }
            | Error::TypeMismatch { handle } => Some(*handle),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(format!("解析配置失败: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let handle = HandleId::new(7);
        assert!(Error::Timeout { handle }.is_retryable());
        assert!(Error::PoolExhausted { capacity: 1 }.is_retryable());
        assert!(!Error::TaskFailure { handle, message: "boom".to_string() }.is_retryable());
        assert!(!Error::SessionClosed.is_retryable());
    }

    #[test]
    fn test_error_handle_and_display() {
        let handle = HandleId::new(3);
        let err = Error::TaskFailure { handle, message: "除零".to_string() };
        assert_eq!(err.handle(), Some(handle));
        assert!(err.to_string().contains("除零"));
        assert!(err.to_string().contains(&handle.to_string()));
        assert_eq!(Error::Config("x".to_string()).handle(), None);
    }
}
