// ==========================================
// 称重流程控制器测试
// ==========================================
// 职责: 验证状态机、自动采集、通知顺序与样本监听
// ==========================================


#[cfg(test)]
mod workflow_test {
    use scale_weighbridge::domain::{NewTransaction, TransactionStatus, WeighingMode};
    use scale_weighbridge::engine::{
        spawn_sample_listener, CaptureOutcome, ChannelEventSink, NoOpEventSink, WeighingError,
        WorkflowConfig, WorkflowEvent, WorkflowState,
    };
    use scale_weighbridge::source::{SimulatedScale, WeightSource};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::Mutex as AsyncMutex;

    use crate::test_helpers::{operator, supervisor, TestEnv};

    fn manual_config() -> WorkflowConfig {
        WorkflowConfig {
            auto_capture_enabled: false,
            ..WorkflowConfig::default()
        }
    }

    fn drain(rx: &mut UnboundedReceiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    // ==========================================
    // 测试1: 手动两次称重
    // ==========================================

    #[test]
    fn test_manual_two_pass() {
        let env = TestEnv::new();
        let (sink, mut rx) = ChannelEventSink::channel();
        let mut controller = env.controller(operator(), manual_config(), Arc::new(sink));
        assert_eq!(controller.state(), WorkflowState::Idle);

        let txn = controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();
        assert_eq!(controller.state(), WorkflowState::AwaitingFirstWeigh);

        controller.on_sample(env.sample(2500.0, true)).unwrap();
        let outcome = controller.capture_manual().unwrap();
        match outcome {
            CaptureOutcome::Captured(event) => {
                assert_eq!(event.seq, 1);
                assert!(!event.is_gross);
                assert_eq!(event.weight, 2500.0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(controller.state(), WorkflowState::AwaitingSecondWeigh);

        controller.on_sample(env.sample(8750.0, true)).unwrap();
        let outcome = controller.capture_manual().unwrap();
        let CaptureOutcome::Completed { event, transaction } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(event.map(|e| e.seq), Some(2));
        assert_eq!(transaction.id, txn.id);
        assert_eq!(transaction.net_weight, Some(6250.0));
        assert_eq!(controller.state(), WorkflowState::Completed);
        assert!(controller.step_description().contains("6250"));

        let events = drain(&mut rx);
        assert!(matches!(
            events.first(),
            Some(WorkflowEvent::TransactionStarted { ticket_no, vehicle_no })
                if ticket_no == "SC-2026-000001" && vehicle_no == "ABC-1234"
        ));
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::TransactionCompleted { net_weight, .. }) if *net_weight == 6250.0
        ));
        let weight_updates = events
            .iter()
            .filter(|e| matches!(e, WorkflowEvent::WeightUpdated { .. }))
            .count();
        assert_eq!(weight_updates, 2);
    }

    // ==========================================
    // 测试2: 稳定持续后自动采集
    // ==========================================

    #[test]
    fn test_auto_capture_after_stable_delay() {
        let env = TestEnv::new();
        let mut controller =
            env.controller(operator(), WorkflowConfig::default(), Arc::new(NoOpEventSink));
        controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();

        // 稳定需 3 秒, 稳定后再等 2 秒
        for _ in 0..5 {
            assert!(controller.on_sample(env.sample(2500.0, false)).unwrap().is_none());
        }
        let outcome = controller.on_sample(env.sample(2500.0, false)).unwrap();
        assert!(matches!(outcome, Some(CaptureOutcome::Captured(_))));
        assert_eq!(controller.state(), WorkflowState::AwaitingSecondWeigh);

        // 同一稳定段不会重复采集
        assert!(controller.on_sample(env.sample(2500.0, false)).unwrap().is_none());

        // 重车上磅
        for _ in 0..5 {
            assert!(controller.on_sample(env.sample(8750.0, false)).unwrap().is_none());
        }
        let outcome = controller.on_sample(env.sample(8750.0, false)).unwrap();
        match outcome {
            Some(CaptureOutcome::Completed { transaction, .. }) => {
                assert_eq!(transaction.net_weight, Some(6250.0));
                assert_eq!(transaction.status, TransactionStatus::Complete);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(controller.state(), WorkflowState::Completed);

        // 完成后不再自动采集
        assert!(controller.on_sample(env.sample(8750.0, false)).unwrap().is_none());
    }

    // ==========================================
    // 测试3: 不稳定读数拒绝采集
    // ==========================================

    #[test]
    fn test_unstable_reading_rejected() {
        let env = TestEnv::new();
        let (sink, mut rx) = ChannelEventSink::channel();
        let mut controller = env.controller(operator(), manual_config(), Arc::new(sink));
        controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();

        controller.on_sample(env.sample(1200.0, false)).unwrap();
        let err = controller.capture_manual().unwrap_err();
        assert!(matches!(err, WeighingError::Validation(_)));
        assert_eq!(controller.state(), WorkflowState::AwaitingFirstWeigh);

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(WorkflowEvent::ErrorOccurred { .. })));

        // 无读数时同样拒绝
        controller.reset_workflow();
        assert!(controller.capture_manual().is_err());
    }

    #[test]
    fn test_out_of_range_sample_emits_error() {
        let env = TestEnv::new();
        let (sink, mut rx) = ChannelEventSink::channel();
        let mut controller = env.controller(operator(), manual_config(), Arc::new(sink));

        assert!(controller.on_sample(env.sample(150_000.0, true)).is_err());
        assert!(controller.validator().is_empty());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], WorkflowEvent::ErrorOccurred { .. }));
    }

    #[test]
    fn test_overload_reading_blocks_capture() {
        let env = TestEnv::new();
        let mut controller = env.controller(operator(), manual_config(), Arc::new(NoOpEventSink));
        let txn = controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();
        controller.on_sample(env.sample(2500.0, true)).unwrap();
        controller.capture_manual().unwrap();

        // 仪表从 90000 跳到超量程, 采集不能使用上一次的有效读数
        controller.on_sample(env.sample(90_000.0, true)).unwrap();
        assert!(controller.on_sample(env.sample(150_000.0, true)).is_err());
        assert_eq!(controller.status().latest_weight, Some(150_000.0));

        let err = controller.capture_manual().unwrap_err();
        assert!(matches!(err, WeighingError::Validation(_)));
        assert_eq!(controller.state(), WorkflowState::AwaitingSecondWeigh);
        assert_eq!(env.manager.get_weigh_events(&txn.id).unwrap().len(), 1);

        // 回到量程内后可以正常采集
        controller.on_sample(env.sample(8750.0, true)).unwrap();
        let CaptureOutcome::Completed { transaction, .. } = controller.capture_manual().unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(transaction.net_weight, Some(6250.0));
    }

    #[test]
    fn test_reading_captured_only_once() {
        let env = TestEnv::new();
        let mut controller = env.controller(operator(), manual_config(), Arc::new(NoOpEventSink));
        let txn = controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();
        controller.on_sample(env.sample(2500.0, true)).unwrap();
        controller.capture_manual().unwrap();

        // 没有新读数时再次采集被拒绝, 不会把皮重当毛重
        let err = controller.capture_manual().unwrap_err();
        assert!(matches!(err, WeighingError::Validation(_)));
        assert_eq!(controller.state(), WorkflowState::AwaitingSecondWeigh);
        let events = env.manager.get_weigh_events(&txn.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);

        controller.on_sample(env.sample(8750.0, true)).unwrap();
        let CaptureOutcome::Completed { transaction, .. } = controller.capture_manual().unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(transaction.net_weight, Some(6250.0));
    }

    #[test]
    fn test_auto_capture_rearms_after_failure() {
        let env = TestEnv::new();
        let mut controller =
            env.controller(operator(), WorkflowConfig::default(), Arc::new(NoOpEventSink));
        let txn = controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();
        // 其他工位作废了该交易, 自动采集写入失败
        env.manager
            .void_transaction(&supervisor(), &txn.id, "其他工位作废")
            .unwrap();

        for _ in 0..5 {
            assert!(controller.on_sample(env.sample(2500.0, false)).unwrap().is_none());
        }
        let err = controller.on_sample(env.sample(2500.0, false)).unwrap_err();
        assert!(matches!(err, WeighingError::State { .. }));

        // 同一稳定段内的下一个样本再次尝试
        let err = controller.on_sample(env.sample(2500.0, false)).unwrap_err();
        assert!(matches!(err, WeighingError::State { .. }));
        assert_eq!(controller.state(), WorkflowState::AwaitingFirstWeigh);
        assert!(env.manager.get_weigh_events(&txn.id).unwrap().is_empty());
    }

    // ==========================================
    // 测试4: 固定皮重流程
    // ==========================================

    #[test]
    fn test_fixed_tare_requires_reference() {
        let env = TestEnv::new();
        let mut controller = env.controller(
            operator(),
            WorkflowConfig {
                record_tare_marker: true,
                ..manual_config()
            },
            Arc::new(NoOpEventSink),
        );

        let err = controller
            .start_weighing(&NewTransaction::new("FT-001", WeighingMode::FixedTare))
            .unwrap_err();
        assert!(matches!(err, WeighingError::MissingTareReference { .. }));
        assert_eq!(controller.state(), WorkflowState::Idle);
        // 未开单
        assert!(env
            .manager
            .get_pending_transaction_by_vehicle("FT-001")
            .unwrap()
            .is_none());

        env.manager
            .set_vehicle_fixed_tare(&supervisor(), "FT-001", 4000.0)
            .unwrap();
        let txn = controller
            .start_weighing(&NewTransaction::new("FT-001", WeighingMode::FixedTare))
            .unwrap();
        assert_eq!(controller.state(), WorkflowState::AwaitingGross);

        // 皮重标记 seq 0
        let events = env.manager.get_weigh_events(&txn.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[0].weight, 4000.0);

        controller.on_sample(env.sample(12000.0, true)).unwrap();
        let CaptureOutcome::Completed { transaction, .. } = controller.capture_manual().unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(transaction.net_weight, Some(8000.0));
    }

    #[test]
    fn test_failed_completion_retried_by_next_capture() {
        let env = TestEnv::new();
        env.manager
            .set_vehicle_fixed_tare(&supervisor(), "FT-002", 4000.0)
            .unwrap();
        let mut controller = env.controller(operator(), manual_config(), Arc::new(NoOpEventSink));
        let txn = controller
            .start_weighing(&NewTransaction::new("FT-002", WeighingMode::FixedTare))
            .unwrap();

        // 毛重低于固定皮重: 采集成功, 完成失败
        controller.on_sample(env.sample(3000.0, true)).unwrap();
        let err = controller.capture_manual().unwrap_err();
        assert!(matches!(err, WeighingError::Validation(_)));
        assert_eq!(controller.state(), WorkflowState::AwaitingGross);
        let status = controller.status();
        assert!(status.completion_pending);
        assert_eq!(status.captured, 1);

        // 重试只重试完成, 不再写称重事件
        assert!(controller.capture_manual().is_err());
        let events = env.manager.get_weigh_events(&txn.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);
        assert_eq!(
            env.manager.get_transaction_by_id(&txn.id).unwrap().unwrap().status,
            TransactionStatus::Pending
        );

        // 修正皮重后重试成功
        env.manager
            .set_vehicle_fixed_tare(&supervisor(), "FT-002", 2000.0)
            .unwrap();
        let CaptureOutcome::Completed { event, transaction } = controller.capture_manual().unwrap() else {
            panic!("expected completion");
        };
        assert!(event.is_none());
        assert_eq!(transaction.net_weight, Some(1000.0));
        assert_eq!(controller.state(), WorkflowState::Completed);
        assert!(!controller.status().completion_pending);
        assert_eq!(env.manager.get_weigh_events(&txn.id).unwrap().len(), 1);
    }

    // ==========================================
    // 测试5: 状态守卫 / 复位 / 作废
    // ==========================================

    #[test]
    fn test_start_rejected_while_awaiting() {
        let env = TestEnv::new();
        let mut controller = env.controller(operator(), manual_config(), Arc::new(NoOpEventSink));
        controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();
        let err = controller
            .start_weighing(&NewTransaction::new("XYZ-5678", WeighingMode::TwoPass))
            .unwrap_err();
        assert!(matches!(err, WeighingError::State { .. }));

        // 复位后交易仍为 pending, 同车不能再开
        controller.reset_workflow();
        assert_eq!(controller.state(), WorkflowState::Idle);
        assert!(controller.active_transaction().is_none());
        let err = controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap_err();
        assert!(matches!(err, WeighingError::Conflict(_)));
        controller
            .start_weighing(&NewTransaction::new("XYZ-5678", WeighingMode::TwoPass))
            .unwrap();
    }

    #[test]
    fn test_void_active_returns_to_idle() {
        let env = TestEnv::new();
        let mut controller = env.controller(supervisor(), manual_config(), Arc::new(NoOpEventSink));
        let txn = controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();

        let voided = controller.void_transaction(&txn.id, "车辆离场").unwrap();
        assert_eq!(voided.status, TransactionStatus::Void);
        assert_eq!(controller.state(), WorkflowState::Idle);

        let status = controller.status();
        assert_eq!(status.transaction_id, None);
        assert_eq!(status.operator, "supervisor01");
    }

    #[test]
    fn test_status_snapshot() {
        let env = TestEnv::new();
        let mut controller = env.controller(operator(), manual_config(), Arc::new(NoOpEventSink));
        controller
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();
        controller.on_sample(env.sample(2500.0, true)).unwrap();
        controller.capture_manual().unwrap();

        let status = controller.status();
        assert_eq!(status.state, WorkflowState::AwaitingSecondWeigh);
        assert_eq!(status.captured, 1);
        assert_eq!(status.required, 2);
        assert_eq!(status.latest_weight, Some(2500.0));
        assert_eq!(status.vehicle_no.as_deref(), Some("ABC-1234"));
        assert!(!status.completion_pending);
    }

    // ==========================================
    // 测试6: 样本监听任务
    // ==========================================

    #[tokio::test]
    async fn test_listener_feeds_controller() {
        let env = TestEnv::new();
        let (sink, mut rx) = ChannelEventSink::channel();
        let controller = Arc::new(AsyncMutex::new(env.controller(
            operator(),
            manual_config(),
            Arc::new(sink),
        )));
        controller
            .lock()
            .await
            .start_weighing(&NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();

        let scale = SimulatedScale::new(env.clock.clone());
        let listener = spawn_sample_listener(controller.clone(), scale.subscribe());
        scale.send(env.sample(2490.0, false));
        scale.send(env.sample(2500.0, true));
        drop(scale);
        listener.await.unwrap();

        let guard = controller.lock().await;
        assert_eq!(guard.status().latest_weight, Some(2500.0));
        assert_eq!(guard.validator().len(), 2);
        drop(guard);

        let updates: Vec<WorkflowEvent> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, WorkflowEvent::WeightUpdated { .. }))
            .collect();
        assert_eq!(
            updates,
            vec![
                WorkflowEvent::WeightUpdated {
                    weight: 2490.0,
                    stable: false
                },
                WorkflowEvent::WeightUpdated {
                    weight: 2500.0,
                    stable: true
                },
            ]
        );
    }
}
