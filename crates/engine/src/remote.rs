// remote.rs
// 远程函数包装：持有函数引用和调度选项，通过 submit 提交到指定会话，替代装饰器式的隐式注册。
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::Result;
use crate::object_store::{ObjectRef, Payload};
use crate::task::{Job, TaskPriority};

/// 远程函数的调度选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOptions {
    pub priority: TaskPriority,
    pub max_retries: u32,
}

type RemoteBody<A, R> = dyn Fn(A) -> std::result::Result<R, String> + Send + Sync;

/// 可提交到工作线程池的函数。参数 A 会为每次尝试克隆一份快照。
pub struct RemoteFn<A, R> {
    name: String,
    func: Arc<RemoteBody<A, R>>,
    options: RemoteOptions,
}

impl<A, R> RemoteFn<A, R>
where
    A: Clone + Send + 'static,
    R: Send + Sync + 'static,
{
    /// 包装一个不会返回错误的函数，panic 仍会被记为任务失败
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self {
            name: short_type_name::<F>(),
            func: Arc::new(move |args: A| -> std::result::Result<R, String> { Ok(func(args)) }),
            options: RemoteOptions::default(),
        }
    }

    /// 包装一个返回 Result 的函数，Err 会挂到结果句柄上
    pub fn fallible<F, E>(func: F) -> Self
    where
        F: Fn(A) -> std::result::Result<R, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        Self {
            name: short_type_name::<F>(),
            func: Arc::new(move |args: A| -> std::result::Result<R, String> {
                func(args).map_err(|e| e.to_string())
            }),
            options: RemoteOptions::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> RemoteOptions {
        self.options
    }

    /// 提交一次调用，立即返回结果句柄
    pub fn submit(&self, ctx: &Context, args: A) -> Result<ObjectRef<R>> {
        let func = self.func.clone();
        let job: Job = Box::new(move || func(args.clone()).map(|value| Arc::new(value) as Payload));
        ctx.submit_job(&self.name, self.options, job)
    }

    /// 对每个参数各提交一次调用，句柄顺序与参数顺序一致
    pub fn submit_all<I>(&self, ctx: &Context, args: I) -> Result<Vec<ObjectRef<R>>>
    where
        I: IntoIterator<Item = A>,
    {
        args.into_iter().map(|a| self.submit(ctx, a)).collect()
    }
}

impl<A, R> Clone for RemoteFn<A, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: self.func.clone(),
            options: self.options,
        }
    }
}

impl<A, R> fmt::Debug for RemoteFn<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFn")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

/// 将只能执行一次的闭包包装为任务体
pub(crate) fn once_job<F, R, E>(func: F) -> Job
where
    F: FnOnce() -> std::result::Result<R, E> + Send + 'static,
    R: Send + Sync + 'static,
    E: fmt::Display,
{
    let mut func = Some(func);
    Box::new(move || -> std::result::Result<Payload, String> {
        let func = func.take().ok_or_else(|| "任务体已被执行过".to_string())?;
        func().map(|value| Arc::new(value) as Payload).map_err(|e| e.to_string())
    })
}

pub(crate) fn short_type_name<F>() -> String {
    let full = std::any::type_name::<F>();
    full.rsplit("::").find(|part| !part.starts_with('{')).unwrap_or(full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_job_runs_only_once() {
        let mut job = once_job(|| Ok::<_, String>(5u8));
        assert!(job().is_ok());
        assert!(job().is_err());
    }

    #[test]
    fn test_short_type_name() {
        fn square(x: u32) -> u32 {
            x * x
        }
        fn name_of<F>(_: &F) -> String {
            short_type_name::<F>()
        }
        assert_eq!(name_of(&square), "square");
        assert!(!name_of(&|| 1u8).starts_with('{'));
    }

    #[test]
    fn test_options_builder() {
        let square = RemoteFn::new(|x: u32| x * x)
            .named("square")
            .with_priority(TaskPriority::High)
            .with_max_retries(2);
        assert_eq!(square.name(), "square");
        assert_eq!(
            square.options(),
            RemoteOptions {
                priority: TaskPriority::High,
                max_retries: 2
            }
        );
        let copy = square.clone();
        assert_eq!(copy.name(), "square");
    }
}
