#![deny(unsafe_code)]
#![doc = "tether-core: 推送式长连接客户端的可靠性内核。"]
#![doc = ""]
#![doc = "== 能力范围 =="]
#![doc = "1. 重连：网络故障断开后按退避策略安排可取消的重连尝试（[`ReconnectController`]）。"]
#![doc = "2. 重要请求：按请求 ID 去重、可过期的异步执行（[`ImportantRequestExecutor`]），以及发送/响应/断开竞速原语（[`RequestWorker`]）。"]
#![doc = "3. 序号缺口：按流维护已观测序号的游程编码并给出缺失区间（[`SequencePresenceTracker`]、[`SequenceLedger`]）。"]
#![doc = ""]
#![doc = "== 运行模型 =="]
#![doc = "不假设单线程事件循环：连接事件、计时器回调与请求完成可能来自任意线程。所有对外操作立即返回 [`ObservableFuture`]，"]
#![doc = "阻塞等待只作为结果单元上的显式选项提供。计时能力通过 [`Scheduler`] 注入，测试使用 [`MockScheduler`] 驱动虚拟时间。"]

pub mod backoff;
pub mod connection;
pub mod error;
pub mod executor;
pub mod future;
pub mod reconnect;
pub mod request;
pub mod sequence;
pub mod signal;
/// 测试桩命名空间，集中暴露可编排的连接替身，供单元测试、集成测试与上层 crate 复用。
pub mod test_stubs;
pub mod time;
pub mod worker;

pub use backoff::{BackoffPolicy, ExponentialBackoff, FixedBackoff, TimeUnit};
pub use connection::{Connection, ConnectionHandle, ConnectionLifecycle};
pub use error::{CoreError, ErrorCategory, ErrorCause, Result, codes};
pub use executor::ImportantRequestExecutor;
pub use future::{ObservableFuture, Outcome};
pub use reconnect::ReconnectController;
pub use request::ImportantRequest;
pub use sequence::{Observation, Run, SequenceLedger, SequencePresenceTracker};
pub use signal::{Registration, Signal};
pub use time::{MockScheduler, Scheduler, ThreadScheduler, TimerHandle};
pub use worker::RequestWorker;
