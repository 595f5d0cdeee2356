use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::object_store::{Failure, RawRef};
use crate::pool::PoolShared;

/// 工作线程状态：Idle → Running → Idle；工作循环崩溃时进入 Failed，重启后回到 Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Idle,
    Running,
    Failed,
}

/// 一轮工作循环的结束方式
enum LoopExit {
    /// 队列关闭且已取空
    Drained,
    /// 任务panic，需要重启工作循环
    Crashed,
}

/// 工作线程入口：工作循环崩溃后标记 Failed、计数并重启，直到队列关闭且取空
pub(crate) fn run(index: usize, shared: Arc<PoolShared>) {
    tracing::debug!(worker = index, "工作线程启动");
    let mut current: Option<RawRef> = None;
    loop {
        let exit = panic::catch_unwind(AssertUnwindSafe(|| serve(index, &shared, &mut current)));
        match exit {
            Ok(LoopExit::Drained) => break,
            Ok(LoopExit::Crashed) => {}
            Err(_) => {
                // 结果尚未回写时崩溃，句柄记为失败，避免等待方永远阻塞
                if let Some(raw) = current.take() {
                    shared
                        .store
                        .resolve(&raw, Err(Failure::Task("工作线程在执行任务时崩溃".to_string())));
                    shared.record_failed();
                }
            }
        }
        shared.set_state(index, WorkerState::Failed);
        shared.record_restart();
        tracing::warn!(worker = index, "工作循环崩溃，重启");
    }
    tracing::debug!(worker = index, "工作线程退出");
}

/// 反复取任务、执行、回写结果。任务在循环体内被丢弃，其析构同样受上层 catch_unwind 保护。
fn serve(index: usize, shared: &PoolShared, current: &mut Option<RawRef>) -> LoopExit {
    shared.set_state(index, WorkerState::Idle);
    while let Some(mut task) = shared.scheduler.fetch_next_task() {
        shared.set_state(index, WorkerState::Running);
        *current = Some(task.target.clone());
        tracing::debug!(worker = index, task = %task.name, handle = %task.handle(), "开始执行任务");

        let report = shared.executor.execute_task(&mut task);
        match &report.outcome {
            Ok(_) => {
                shared.record_completed();
                tracing::debug!(
                    worker = index,
                    handle = %task.handle(),
                    attempts = report.attempts,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "任务完成"
                );
            }
            Err(failure) => {
                shared.record_failed();
                tracing::warn!(
                    worker = index,
                    task = %task.name,
                    handle = %task.handle(),
                    attempts = report.attempts,
                    error = ?failure,
                    "任务失败"
                );
            }
        }
        shared.store.resolve(&task.target, report.outcome);
        *current = None;
        drop(task);

        if report.panicked {
            return LoopExit::Crashed;
        }
        shared.set_state(index, WorkerState::Idle);
    }
    LoopExit::Drained
}
