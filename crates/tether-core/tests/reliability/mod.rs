//! 可靠性层集成测试入口：重连循环、重要请求竞速与序号缺口追踪在组合场景下的行为。
//!
//! # 模块目的（Why）
//! - 单元测试分别验证各组件，本套件把控制器、执行器、worker 与连接替身组合起来，
//!   覆盖“断开 → 重连 → 重新订阅”这类跨组件时序；
//! - 全部场景使用 `MockScheduler` 驱动虚拟时间，结果完全可复现。
//!
//! # 结构概览（What）
//! - [`tests::reliability::reconnect_cycle`]：退避曲线、失败清理与停止后的静默；
//! - [`tests::reliability::request_race`]：去重、过期与断开对请求结果的影响；
//! - [`tests::reliability::sequence_properties`]：任意插入顺序下游程编码与参考模型一致。

pub mod tests {
    //! 集成测试命名空间：统一归档在 `tests::reliability` 之下，便于过滤。
    pub mod reliability {
        include!("reconnect_cycle.rs");
        include!("request_race.rs");
        include!("sequence_properties.rs");
    }
}
