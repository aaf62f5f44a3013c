//! 时间抽象模块：统一“读取单调时间”与“延迟执行可取消任务”两项能力。
//!
//! # 模块定位（Why）
//! - 重连退避与请求过期都依赖计时器；若直接启动线程或调用系统时钟，测试将无法复现时序；
//! - [`Scheduler`] trait 让生产环境使用真实计时线程，测试环境使用手动推进的虚拟时间。
//!
//! # 结构概览（What）
//! - [`scheduler::Scheduler`]：核心 trait，暴露 `now`/`schedule`；
//! - [`scheduler::ThreadScheduler`]：单个后台计时线程，关闭或丢弃时确定性回收；
//! - [`scheduler::MockScheduler`]：虚拟时间，`advance` 在调用线程上按截止时间顺序执行到期任务；
//! - [`scheduler::TimerHandle`]：可取消句柄，取消与触发通过一次 CAS 竞争。

pub mod scheduler;

pub use scheduler::{MockScheduler, Scheduler, ThreadScheduler, TimerHandle, TimerTask};
