// tests/shutdown_coordinator.rs
use demo_api::lifecycle::{Deadline, ShutdownCoordinator, ShutdownError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[tokio::test]
async fn test_service_resources_close_well_within_timeout() {
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
    let closed = Arc::new(Mutex::new(Vec::new()));

    let resources = [
        ("http", 40),
        ("redis", 5),
        ("kafka-client", 20),
        ("kafka-producer", 30),
        ("postgres", 45),
        ("mysql", 10),
    ];
    for (name, millis) in resources {
        let closed = closed.clone();
        coordinator.add_handler(name, move |deadline: Deadline| async move {
            deadline.run(sleep(Duration::from_millis(millis))).await?;
            closed.lock().unwrap().push(name);
            Ok(())
        });
    }

    let start = Instant::now();
    coordinator.shutdown(Deadline::unbounded()).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    let mut closed = closed.lock().unwrap().clone();
    closed.sort_unstable();
    assert_eq!(
        closed,
        vec!["http", "kafka-client", "kafka-producer", "mysql", "postgres", "redis"]
    );
}

#[tokio::test]
async fn test_hung_resource_does_not_hold_up_exit() {
    let coordinator = ShutdownCoordinator::new(Duration::from_millis(200));
    coordinator.add_handler("stuck-producer", |_deadline| async {
        // ignores its deadline entirely
        sleep(Duration::from_secs(10)).await;
        Ok(())
    });
    coordinator.add_handler("redis", |_| async { Ok(()) });

    let start = Instant::now();
    let result = coordinator.shutdown(Deadline::unbounded()).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(ShutdownError::DeadlineExceeded { .. })));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[tokio::test]
async fn test_failure_is_reported_and_siblings_still_run() {
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    let completed = Arc::new(AtomicUsize::new(0));

    for name in ["mysql", "postgres", "kafka"] {
        let completed = completed.clone();
        coordinator.add_handler(name, move |_| async move {
            sleep(Duration::from_millis(50)).await;
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    coordinator.add_handler("redis", |_| async {
        Err(anyhow::anyhow!("redis cleanup: connection already closed"))
    });

    let err = coordinator.shutdown(Deadline::unbounded()).await.unwrap_err();
    assert!(err.to_string().contains("redis"));

    sleep(Duration::from_millis(300)).await;
    assert_eq!(completed.load(Ordering::SeqCst), 3);
}
