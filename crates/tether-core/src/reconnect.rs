//! 重连控制器：在网络故障导致的断开后按退避策略安排重连。
//!
//! # 设计背景（Why）
//! 重试循环以显式状态机表达，而不是依赖“失败 → 强制断开 → 断开事件再次触发调度”的事件回环：
//! 取消只需要注销一个观察者并取消一个计时器句柄，测试可以用虚拟时间逐步推进。
//!
//! # 状态机（How）
//! - `Stopped`：不观察任何事件，没有待执行的尝试；
//! - `Started`：在绑定连接的断开事件上登记观察者。网络原因的断开且当前没有已安排或进行中的尝试时，
//!   以 `policy.delay(consecutive_attempts + 1)` 安排一次尝试；
//! - 尝试成功清零连续失败计数；失败则计数加一、直接安排下一次尝试，并以网络原因强制断开做清理，
//!   由此产生的断开事件因已有待执行尝试而被忽略。
//!
//! 每次 `start`/`stop`/`bind` 都会推进代次，旧代次的观察者回调、计时器与连接结果一律作废，
//! 因此与 `stop` 并发到达的迟到事件不会重新开启循环。
//!
//! # 契约说明（What）
//! - 断开观察者运行在连接的事件分发上下文中，只做状态判断与登记计时器，从不阻塞；
//! - `stop` 幂等；控制器被丢弃时自动 `stop`；
//! - `bind` 在 `Started` 状态下先隐式 `stop`，绑定后保持 `Stopped`，需要再次 `start`。

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backoff::BackoffPolicy;
use crate::connection::{ConnectionHandle, ConnectionLifecycle};
use crate::error::{CoreError, codes};
use crate::future::Outcome;
use crate::signal::Registration;
use crate::time::{Scheduler, TimerHandle};

#[derive(Default)]
struct ControllerState {
    connection: Option<Arc<dyn ConnectionLifecycle>>,
    started: bool,
    generation: u64,
    consecutive_attempts: u32,
    scheduled: Option<TimerHandle>,
    in_flight: bool,
    registration: Option<Registration>,
}

struct ControllerInner {
    scheduler: Arc<dyn Scheduler>,
    policy: Arc<dyn BackoffPolicy>,
    state: Mutex<ControllerState>,
}

/// 绑定到单个连接生命周期的重连状态机。
pub struct ReconnectController {
    inner: Arc<ControllerInner>,
}

impl ReconnectController {
    pub fn new(scheduler: Arc<dyn Scheduler>, policy: Arc<dyn BackoffPolicy>) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                scheduler,
                policy,
                state: Mutex::new(ControllerState::default()),
            }),
        }
    }

    /// 绑定连接；若处于 `Started` 则先停止观察旧连接。
    pub fn bind(&self, connection: Arc<dyn ConnectionLifecycle>) {
        self.stop();
        let mut state = self.inner.state.lock();
        state.connection = Some(connection);
        state.consecutive_attempts = 0;
    }

    /// 开始观察断开事件；未绑定连接时返回 `false` 并保持停止。
    pub fn start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.started {
            return true;
        }
        let Some(connection) = state.connection.clone() else {
            tracing::debug!("reconnect controller has no connection bound");
            return false;
        };
        state.generation += 1;
        let generation = state.generation;
        let weak = Arc::downgrade(&self.inner);
        state.registration = Some(connection.disconnected_events().subscribe(move |handle| {
            if let Some(inner) = weak.upgrade() {
                inner.on_disconnect(generation, handle);
            }
        }));
        state.started = true;
        tracing::debug!(generation, "reconnect controller started");
        true
    }

    /// 停止观察并取消待执行的尝试；返回 `true` 表示本次调用完成了停止。
    pub fn stop(&self) -> bool {
        let (registration, scheduled) = {
            let mut state = self.inner.state.lock();
            if !state.started {
                return false;
            }
            state.started = false;
            state.generation += 1;
            state.in_flight = false;
            (state.registration.take(), state.scheduled.take())
        };
        if let Some(registration) = registration {
            registration.unregister();
        }
        if let Some(timer) = scheduled {
            timer.cancel();
        }
        tracing::debug!("reconnect controller stopped");
        true
    }

    pub fn is_started(&self) -> bool {
        self.inner.state.lock().started
    }

    /// 自上次成功以来连续失败的尝试次数。
    pub fn consecutive_attempts(&self) -> u32 {
        self.inner.state.lock().consecutive_attempts
    }

    /// 是否有已安排但尚未触发的尝试。
    pub fn has_scheduled_attempt(&self) -> bool {
        self.inner
            .state
            .lock()
            .scheduled
            .as_ref()
            .is_some_and(TimerHandle::is_pending)
    }
}

impl fmt::Debug for ReconnectController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ReconnectController")
            .field("started", &state.started)
            .field("consecutive_attempts", &state.consecutive_attempts)
            .field("scheduled", &state.scheduled.is_some())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl Drop for ReconnectController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ControllerInner {
    fn on_disconnect(self: &Arc<Self>, generation: u64, handle: &ConnectionHandle) {
        if !handle.disconnected_via_network() {
            tracing::debug!(connection = handle.id(), "local disconnect, reconnect skipped");
            return;
        }
        let mut state = self.state.lock();
        if !state.started || state.generation != generation {
            return;
        }
        if state.scheduled.is_some() || state.in_flight {
            tracing::debug!(connection = handle.id(), "reconnect already pending");
            return;
        }
        self.schedule_attempt(&mut state, generation);
    }

    fn schedule_attempt(self: &Arc<Self>, state: &mut ControllerState, generation: u64) {
        let attempt = state.consecutive_attempts.saturating_add(1);
        let delay = self.policy.delay(attempt);
        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.run_attempt(generation);
                }
            }),
        );
        state.scheduled = Some(timer);
        tracing::info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
    }

    fn run_attempt(self: &Arc<Self>, generation: u64) {
        let connection = {
            let mut state = self.state.lock();
            if !state.started || state.generation != generation {
                return;
            }
            state.scheduled = None;
            state.in_flight = true;
            state.connection.clone()
        };
        let Some(connection) = connection else {
            return;
        };
        tracing::info!("reconnect attempt started");
        let weak = Arc::downgrade(self);
        connection.connect().on_settle(move |outcome| {
            if let Some(inner) = weak.upgrade() {
                inner.finish_attempt(generation, outcome);
            }
        });
    }

    fn finish_attempt(self: &Arc<Self>, generation: u64, outcome: &Outcome<ConnectionHandle>) {
        let cleanup = {
            let mut state = self.state.lock();
            if !state.started || state.generation != generation {
                return;
            }
            state.in_flight = false;
            if let Outcome::Succeeded(handle) = outcome {
                state.consecutive_attempts = 0;
                tracing::info!(connection = handle.id(), "reconnected");
                None
            } else {
                state.consecutive_attempts = state.consecutive_attempts.saturating_add(1);
                tracing::warn!(
                    attempts = state.consecutive_attempts,
                    code = outcome.cause().map_or(codes::REQUEST_CANCELLED, CoreError::code),
                    "reconnect attempt failed"
                );
                if state.scheduled.is_none() {
                    self.schedule_attempt(&mut state, generation);
                }
                state.connection.clone()
            }
        };
        if let Some(connection) = cleanup {
            connection.disconnect(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{ExponentialBackoff, FixedBackoff, TimeUnit};
    use crate::test_stubs::{ConnectStep, MockConnection};
    use crate::time::MockScheduler;
    use std::time::Duration;
    use tracing_test::traced_test;

    type Conn = MockConnection<(), ()>;

    fn controller(policy: Arc<dyn BackoffPolicy>) -> (ReconnectController, MockScheduler, Arc<Conn>) {
        let scheduler = MockScheduler::new();
        let controller = ReconnectController::new(Arc::new(scheduler.clone()), policy);
        let connection = Arc::new(Conn::connected());
        controller.bind(connection.clone());
        (controller, scheduler, connection)
    }

    fn fixed(ms: u64) -> Arc<dyn BackoffPolicy> {
        Arc::new(FixedBackoff::new(Duration::from_millis(ms)))
    }

    #[test]
    fn start_requires_a_bound_connection() {
        let controller = ReconnectController::new(Arc::new(MockScheduler::new()), fixed(10));
        assert!(!controller.start());
        assert!(!controller.is_started());
        assert!(!controller.stop());
    }

    #[test]
    fn network_disconnect_schedules_exactly_one_attempt() {
        let (controller, scheduler, connection) = controller(fixed(500));
        assert!(controller.start());

        connection.fire_disconnect(true);
        connection.fire_disconnect(true);
        assert_eq!(scheduler.pending_tasks(), 1);
        assert_eq!(scheduler.next_delay(), Some(Duration::from_millis(500)));

        scheduler.advance(Duration::from_millis(500));
        assert_eq!(connection.connect_calls(), 1);
        assert!(connection.is_connected());
        assert_eq!(controller.consecutive_attempts(), 0);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn local_disconnect_is_ignored() {
        let (controller, scheduler, connection) = controller(fixed(10));
        controller.start();
        connection.fire_disconnect(false);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn stop_cancels_scheduled_attempt_and_ignores_later_disconnects() {
        let (controller, scheduler, connection) = controller(fixed(100));
        controller.start();
        connection.fire_disconnect(true);
        assert!(controller.has_scheduled_attempt());

        assert!(controller.stop());
        assert!(!controller.stop());
        connection.fire_disconnect(true);
        scheduler.advance(Duration::from_secs(10));

        assert_eq!(scheduler.pending_tasks(), 0);
        assert_eq!(connection.connect_calls(), 0);
        assert_eq!(connection.disconnected_events().observer_count(), 0);
    }

    #[test]
    fn failed_attempt_backs_off_and_cleans_up() {
        let policy = ExponentialBackoff::new(100, 2.0, TimeUnit::Millis).expect("valid");
        let (controller, scheduler, connection) = controller(Arc::new(policy));
        controller.start();
        connection.script_connect(ConnectStep::Fail(CoreError::new(
            codes::TRANSPORT_CONNECT_FAILED,
            "refused",
        )));
        connection.script_connect(ConnectStep::Fail(CoreError::new(
            codes::TRANSPORT_CONNECT_FAILED,
            "refused",
        )));

        connection.fire_disconnect(true);
        scheduler.advance(Duration::from_millis(100));
        assert_eq!(controller.consecutive_attempts(), 1);
        assert_eq!(scheduler.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(connection.disconnect_calls(), vec![true]);

        scheduler.advance(Duration::from_millis(200));
        assert_eq!(controller.consecutive_attempts(), 2);
        assert_eq!(scheduler.next_delay(), Some(Duration::from_millis(400)));

        scheduler.advance(Duration::from_millis(400));
        assert_eq!(connection.connect_calls(), 3);
        assert_eq!(controller.consecutive_attempts(), 0);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn rebinding_while_started_stops_observing_old_connection() {
        let (controller, scheduler, old) = controller(fixed(10));
        controller.start();

        let replacement = Arc::new(Conn::connected());
        controller.bind(replacement.clone());
        assert!(!controller.is_started());
        assert_eq!(old.disconnected_events().observer_count(), 0);

        old.fire_disconnect(true);
        assert_eq!(scheduler.pending_tasks(), 0);

        controller.start();
        replacement.fire_disconnect(true);
        assert_eq!(scheduler.pending_tasks(), 1);
    }

    #[test]
    fn dropping_controller_cancels_timer() {
        let (controller, scheduler, connection) = controller(fixed(10));
        controller.start();
        connection.fire_disconnect(true);
        drop(controller);
        assert_eq!(scheduler.pending_tasks(), 0);
        assert_eq!(connection.disconnected_events().observer_count(), 0);
    }

    #[test]
    #[traced_test]
    fn scheduling_and_failures_are_logged() {
        let (controller, scheduler, connection) = controller(fixed(50));
        controller.start();
        connection.script_connect(ConnectStep::Fail(CoreError::new(
            codes::TRANSPORT_CONNECT_FAILED,
            "refused",
        )));
        connection.fire_disconnect(true);
        scheduler.advance(Duration::from_millis(50));

        assert!(logs_contain("reconnect scheduled"));
        assert!(logs_contain("reconnect attempt failed"));
        assert!(logs_contain("transport.connect_failed"));
    }
}
