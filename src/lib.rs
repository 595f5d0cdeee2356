// lib.rs
// 根包入口，对外重新导出 engine 子 crate，示例程序通过它使用任务引擎。
pub use engine::*;
