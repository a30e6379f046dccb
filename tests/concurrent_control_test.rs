// ==========================================
// 并发控制测试
// ==========================================
// 职责: 验证多连接并发写入下的唯一性约束
// ==========================================


#[cfg(test)]
mod concurrent_control_test {
    use scale_weighbridge::auth::RolePermissionGateway;
    use scale_weighbridge::clock::SystemClock;
    use scale_weighbridge::domain::{CaptureRequest, NewTransaction, TransactionStatus, WeighingMode};
    use scale_weighbridge::engine::{ManagerConfig, TransactionManager, WeighingError};
    use scale_weighbridge::repository::TransactionRepository;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::test_helpers::{create_test_db, open_conn, operator};

    /// 每个线程一个独立连接, 模拟多个工位
    fn manager_for(db_path: &str) -> TransactionManager {
        let repo = Arc::new(TransactionRepository::new(open_conn(db_path)));
        TransactionManager::new(
            repo,
            Arc::new(RolePermissionGateway::default()),
            Arc::new(SystemClock),
            ManagerConfig::default(),
        )
    }

    // ==========================================
    // 测试1: 同一车辆并发开单只有一个成功
    // ==========================================

    #[test]
    fn test_concurrent_start_same_vehicle() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let workers = 6;
        let barrier = Arc::new(Barrier::new(workers));

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let db_path = db_path.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let manager = manager_for(&db_path);
                    barrier.wait();
                    manager.start_transaction(
                        &operator(),
                        &NewTransaction::new("ABC-1234", WeighingMode::TwoPass),
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert!(matches!(result, Err(WeighingError::Conflict(_))));
        }

        let manager = manager_for(&db_path);
        let pending = manager
            .get_transactions_by_status(TransactionStatus::Pending, None)
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    // ==========================================
    // 测试2: 并发开单票号唯一且连续
    // ==========================================

    #[test]
    fn test_concurrent_ticket_numbers_unique() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));

        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let db_path = db_path.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let manager = manager_for(&db_path);
                    barrier.wait();
                    manager
                        .start_transaction(
                            &operator(),
                            &NewTransaction::new(format!("CAR-{:03}", i), WeighingMode::TwoPass),
                        )
                        .unwrap()
                })
            })
            .collect();

        let created: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ticket_nos: HashSet<i64> = created.iter().map(|t| t.ticket_no).collect();
        let labels: HashSet<&str> = created.iter().map(|t| t.ticket_label.as_str()).collect();
        assert_eq!(ticket_nos.len(), workers);
        assert_eq!(labels.len(), workers);
        assert_eq!(ticket_nos, (1..=workers as i64).collect::<HashSet<_>>());
    }

    // ==========================================
    // 测试3: 同一序号并发采集只写入一次
    // ==========================================

    #[test]
    fn test_concurrent_capture_same_sequence() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let txn = manager_for(&db_path)
            .start_transaction(&operator(), &NewTransaction::new("ABC-1234", WeighingMode::TwoPass))
            .unwrap();

        let workers = 4;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let db_path = db_path.clone();
                let barrier = barrier.clone();
                let txn_id = txn.id.clone();
                thread::spawn(move || {
                    let manager = manager_for(&db_path);
                    barrier.wait();
                    manager.capture_weight(
                        &operator(),
                        &CaptureRequest::new(txn_id, 2500.0 + i as f64, 1, false),
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let events = manager_for(&db_path).get_weigh_events(&txn.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);
    }
}
