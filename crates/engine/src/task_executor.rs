// task_executor.rs
// 任务执行器，负责单个任务的执行、失败重试、退避等待以及panic捕获。
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::object_store::{Failure, Outcome, Payload};
use crate::task::{Task, TaskStatus};

/// 一次任务执行的结果汇总
#[derive(Debug)]
pub(crate) struct ExecutionReport {
    pub outcome: Outcome,
    pub attempts: u32,
    /// 最后一次尝试是否以panic结束
    pub panicked: bool,
    pub elapsed: Duration,
}

pub struct TaskExecutor {
    /// 第n次重试前等待 n * retry_backoff
    pub retry_backoff: Duration,
}

impl TaskExecutor {
    pub fn new(retry_backoff: Duration) -> Self {
        Self { retry_backoff }
    }

    pub(crate) fn execute_task(&self, task: &mut Task) -> ExecutionReport {
        let start_time = Instant::now();
        task.status = TaskStatus::Running;
        let mut retry_count = 0;
        loop {
            let (result, panicked) = self.execute_single_attempt(task);
            match result {
                Ok(payload) => {
                    task.status = TaskStatus::Completed;
                    return ExecutionReport {
                        outcome: Ok(payload),
                        attempts: retry_count + 1,
                        panicked: false,
                        elapsed: start_time.elapsed(),
                    };
                }
                Err(message) => {
                    if retry_count >= task.max_retries {
                        task.status = TaskStatus::Failed(message.clone());
                        return ExecutionReport {
                            outcome: Err(Failure::Task(message)),
                            attempts: retry_count + 1,
                            panicked,
                            elapsed: start_time.elapsed(),
                        };
                    }
                    retry_count += 1;
                    tracing::debug!(
                        task = %task.name,
                        handle = %task.handle(),
                        attempt = retry_count,
                        error = %message,
                        "任务失败，准备重试"
                    );
                    std::thread::sleep(self.retry_backoff * retry_count);
                }
            }
        }
    }

    fn execute_single_attempt(&self, task: &mut Task) -> (std::result::Result<Payload, String>, bool) {
        match panic::catch_unwind(AssertUnwindSafe(|| (task.job)())) {
            Ok(result) => (result, false),
            Err(payload) => (Err(format!("任务panic: {}", panic_message(payload.as_ref()))), true),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::ObjectStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn task_with(store: &ObjectStore, job: crate::task::Job) -> Task {
        Task::new("test", store.allocate::<u32>().raw(), job)
    }

    #[test]
    fn test_task_executor() {
        let store = ObjectStore::new(Uuid::new_v4());
        let executor = TaskExecutor::new(Duration::from_millis(1));
        let mut task = task_with(&store, Box::new(|| -> Result<Payload, String> { Ok(Arc::new(42u32)) }));

        let report = executor.execute_task(&mut task);
        assert!(report.outcome.is_ok());
        assert_eq!(report.attempts, 1);
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_retries_until_success() {
        let store = ObjectStore::new(Uuid::new_v4());
        let executor = TaskExecutor::new(Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let job = Box::new(move || -> Result<Payload, String> {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("暂时失败".to_string())
            } else {
                Ok(Arc::new(1u32))
            }
        });
        let mut task = task_with(&store, job).with_max_retries(3);

        let report = executor.execute_task(&mut task);
        assert!(report.outcome.is_ok());
        assert_eq!(report.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let store = ObjectStore::new(Uuid::new_v4());
        let executor = TaskExecutor::new(Duration::from_millis(1));
        let job = Box::new(|| -> Result<Payload, String> { Err("总是失败".to_string()) });
        let mut task = task_with(&store, job).with_max_retries(1);

        let report = executor.execute_task(&mut task);
        assert_eq!(report.attempts, 2);
        assert!(matches!(report.outcome, Err(Failure::Task(ref m)) if m == "总是失败"));
        assert_eq!(task.status, TaskStatus::Failed("总是失败".to_string()));
    }

    #[test]
    fn test_panic_is_captured() {
        let store = ObjectStore::new(Uuid::new_v4());
        let executor = TaskExecutor::new(Duration::from_millis(1));
        let job = Box::new(|| -> Result<Payload, String> { panic!("除数为零") });
        let mut task = task_with(&store, job);

        let report = executor.execute_task(&mut task);
        assert!(report.panicked);
        assert!(matches!(report.outcome, Err(Failure::Task(ref m)) if m.contains("除数为零")));
    }
}
