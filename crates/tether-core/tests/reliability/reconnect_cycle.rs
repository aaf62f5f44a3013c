pub mod reconnect_cycle {
    //! 重连循环：网络抖动下的退避节律、失败后的清理断开，以及停止后的彻底静默。

    use std::sync::Arc;
    use std::time::Duration;

    use tether_core::error::{CoreError, codes};
    use tether_core::test_stubs::{ConnectStep, MockConnection};
    use tether_core::{
        ConnectionLifecycle, ExponentialBackoff, MockScheduler, ReconnectController, TimeUnit,
    };

    type Conn = MockConnection<String, String>;

    fn refused() -> ConnectStep {
        ConnectStep::Fail(CoreError::new(
            codes::TRANSPORT_CONNECT_FAILED,
            "connection refused",
        ))
    }

    /// 连续三次失败后成功：延迟依次为 200、400、800（封顶）与 800 毫秒。
    #[test]
    fn backoff_grows_until_cap_then_resets_on_success() {
        let scheduler = MockScheduler::new();
        let policy = ExponentialBackoff::new(200, 2.0, TimeUnit::Millis)
            .expect("valid policy")
            .with_max(Duration::from_millis(800));
        let controller = ReconnectController::new(Arc::new(scheduler.clone()), Arc::new(policy));
        let connection = Arc::new(Conn::connected());
        controller.bind(connection.clone());
        assert!(controller.start());

        for _ in 0..3 {
            connection.script_connect(refused());
        }
        connection.fire_disconnect(true);

        let mut observed = Vec::new();
        while let Some(delay) = scheduler.next_delay() {
            observed.push(delay);
            scheduler.advance(delay);
        }

        assert_eq!(
            observed,
            [200, 400, 800, 800].map(Duration::from_millis).to_vec()
        );
        assert_eq!(connection.connect_calls(), 4);
        assert_eq!(connection.disconnect_calls(), vec![true, true, true]);
        assert!(connection.is_connected());
        assert_eq!(controller.consecutive_attempts(), 0);
    }

    /// 连接恢复后再次掉线，从第一档延迟重新开始。
    #[test]
    fn second_outage_starts_from_first_delay() {
        let scheduler = MockScheduler::new();
        let policy = ExponentialBackoff::new(1, 3.0, TimeUnit::Seconds).expect("valid policy");
        let controller = ReconnectController::new(Arc::new(scheduler.clone()), Arc::new(policy));
        let connection = Arc::new(Conn::connected());
        controller.bind(connection.clone());
        controller.start();

        connection.script_connect(refused());
        connection.fire_disconnect(true);
        scheduler.advance(Duration::from_secs(1));
        assert_eq!(scheduler.next_delay(), Some(Duration::from_secs(3)));
        scheduler.advance(Duration::from_secs(3));
        assert!(connection.is_connected());

        connection.fire_disconnect(true);
        assert_eq!(scheduler.next_delay(), Some(Duration::from_secs(1)));
    }

    /// 已安排的尝试在触发前被停止：计时器被取消，之后的断开也不再安排尝试。
    #[test]
    fn stop_before_attempt_fires_leaves_no_timer() {
        let scheduler = MockScheduler::new();
        let controller = ReconnectController::new(
            Arc::new(scheduler.clone()),
            Arc::new(ExponentialBackoff::default()),
        );
        let connection = Arc::new(Conn::connected());
        controller.bind(connection.clone());
        controller.start();

        connection.fire_disconnect(true);
        controller.stop();
        connection.script_connect(refused());
        scheduler.advance(Duration::from_secs(30));
        connection.fire_disconnect(true);

        assert_eq!(connection.connect_calls(), 0);
        assert_eq!(scheduler.pending_tasks(), 0);
        assert!(!controller.is_started());
    }
}
