pub mod request_race {
    //! 重要请求：执行器去重与过期叠加在 worker 的发送/响应/断开竞速之上。

    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tether_core::error::codes;
    use tether_core::test_stubs::MockConnection;
    use tether_core::{
        Connection, ConnectionLifecycle, CoreError, ImportantRequest, ImportantRequestExecutor,
        MockScheduler, Outcome, RequestWorker, Scheduler,
    };

    #[derive(Clone, Debug, PartialEq)]
    enum Reply {
        Subscribed(String),
        Other,
    }

    type Conn = MockConnection<String, Reply>;

    struct Harness {
        scheduler: MockScheduler,
        connection: Arc<Conn>,
        worker: RequestWorker<Conn>,
        executor: ImportantRequestExecutor,
    }

    fn harness() -> Harness {
        let scheduler = MockScheduler::new();
        let connection = Arc::new(Conn::connected());
        Harness {
            executor: ImportantRequestExecutor::new(Arc::new(scheduler.clone())),
            worker: RequestWorker::new(Arc::clone(&connection)),
            scheduler,
            connection,
        }
    }

    impl Harness {
        fn subscribe(&self, channel: &str, ttl: Duration) -> tether_core::ObservableFuture<String> {
            let request = ImportantRequest::new(
                format!("subscribe:session-1:{channel}"),
                "subscribe",
                json!({ "channel": channel }),
                self.scheduler.now(),
                ttl,
            );
            let worker = self.worker.clone();
            let channel = channel.to_owned();
            self.executor.execute(request, move || {
                let expected = channel.clone();
                Ok(worker.execute(format!("subscribe {channel}"), move |reply| match reply {
                    Reply::Subscribed(name) if *name == expected => Some(name.clone()),
                    _ => None,
                }))
            })
        }
    }

    #[test]
    fn duplicate_subscribe_sends_once_and_shares_result() {
        let h = harness();
        let first = h.subscribe("/news", Duration::from_secs(10));
        let second = h.subscribe("/news", Duration::from_secs(10));

        assert!(first.ptr_eq(&second));
        assert_eq!(h.connection.sent(), vec!["subscribe /news".to_owned()]);

        h.connection.deliver(Reply::Other);
        h.connection.deliver(Reply::Subscribed("/news".to_owned()));
        assert!(matches!(second.outcome(), Some(Outcome::Succeeded(name)) if name == "/news"));
        assert_eq!(h.executor.pending_count(), 0);
        assert_eq!(h.connection.inbound_events().observer_count(), 0);
    }

    #[test]
    fn disconnect_fails_request_and_frees_the_id() {
        let h = harness();
        let first = h.subscribe("/news", Duration::from_secs(10));
        h.connection.fire_disconnect(true);

        assert_eq!(first.cause().map(CoreError::code), Some(codes::TRANSPORT_DISCONNECTED));
        assert!(!h.executor.is_pending("subscribe:session-1:/news"));

        h.connection.connect();
        let retry = h.subscribe("/news", Duration::from_secs(10));
        assert!(!retry.ptr_eq(&first));
        assert_eq!(h.connection.sent_count(), 2);
    }

    #[test]
    fn unanswered_request_expires_and_releases_observers() {
        let h = harness();
        let pending = h.subscribe("/quiet", Duration::from_millis(1_500));
        h.scheduler.advance(Duration::from_millis(1_500));

        assert!(!pending.is_cancelled());
        assert!(pending.cause().is_some_and(CoreError::is_timeout));
        assert_eq!(h.connection.inbound_events().observer_count(), 0);
        assert_eq!(h.connection.disconnected_events().observer_count(), 0);

        h.connection.deliver(Reply::Subscribed("/quiet".to_owned()));
        assert!(pending.cause().is_some(), "late response is ignored");
    }

    #[test]
    fn shutdown_cancels_in_flight_worker() {
        let h = harness();
        let pending = h.subscribe("/a", Duration::from_secs(5));
        assert_eq!(h.executor.pending_requests().len(), 1);
        h.executor.shutdown();

        assert!(pending.is_cancelled());
        assert_eq!(h.connection.inbound_events().observer_count(), 0);
        assert_eq!(h.scheduler.pending_tasks(), 0);
    }
}
