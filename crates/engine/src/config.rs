// config.rs
// 引擎全局配置结构体及其默认实现，包含工作线程数、队列上限、背压策略和重试退避等参数。
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::*;

/// 队列满时提交任务的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// 阻塞提交方，直到队列有空位
    #[default]
    Block,
    /// 立即返回 PoolExhausted
    FailFast,
}

/// 引擎全局配置，控制并发、队列和重试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 工作线程数
    pub num_workers: usize,
    /// 等待队列上限
    pub max_backlog: usize,
    /// 队列满时的背压策略
    pub backpressure: BackpressurePolicy,
    /// 重试退避的基本单位（毫秒），第n次重试等待 n * retry_backoff_ms
    pub retry_backoff_ms: u64,
    /// 异步汇聚时共享通道的容量
    pub gather_channel_capacity: usize,
}

impl Default for EngineConfig {
    /// 默认配置：4个工作线程，队列上限1024，阻塞背压
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            max_backlog: DEFAULT_MAX_BACKLOG,
            backpressure: BackpressurePolicy::Block,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            gather_channel_capacity: DEFAULT_GATHER_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// 指定工作线程数，其余取默认值
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    /// 从 JSON 配置文件读取配置，缺省字段使用默认值
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!("未找到配置文件 {}", path.display())));
        }
        let contents = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置参数
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(Error::Config("num_workers 必须大于 0".to_string()));
        }
        if self.max_backlog == 0 {
            return Err(Error::Config("max_backlog 必须大于 0".to_string()));
        }
        if self.gather_channel_capacity == 0 {
            return Err(Error::Config("gather_channel_capacity 必须大于 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.backpressure, BackpressurePolicy::Block);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"num_workers": 2, "backpressure": "fail_fast"}}"#).unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.backpressure, BackpressurePolicy::FailFast);
        assert_eq!(config.max_backlog, DEFAULT_MAX_BACKLOG);
    }

    #[test]
    fn test_from_json_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"num_workers": 0}}"#).unwrap();
        assert!(matches!(EngineConfig::from_json_file(file.path()), Err(Error::Config(_))));

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "not json").unwrap();
        assert!(matches!(EngineConfig::from_json_file(broken.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::from_json_file(dir.path().join("engine.json"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
