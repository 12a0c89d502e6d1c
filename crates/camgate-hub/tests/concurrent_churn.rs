use camgate_hub::{Connection, ConnectionRegistry, Dispatcher, PushFrame};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn churn_during_dispatch_leaves_registry_consistent() {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Dispatcher::new(registry.clone());

    let mut workers = Vec::new();
    for worker in 0..8 {
        let registry = registry.clone();
        workers.push(tokio::spawn(async move {
            let tenant = format!("t{}", worker % 2);
            for round in 0..200 {
                let (connection, mut receiver) = Connection::open(&tenant, "u", 4);
                let guard = registry.admit_guarded(&connection);
                drop(connection);
                if round % 3 == 0 {
                    // Leave it for the dispatcher to prune.
                    receiver.close();
                    tokio::task::yield_now().await;
                }
                drop(guard);
            }
        }));
    }

    let producer = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            for seq in 0..500 {
                let tenant = if seq % 2 == 0 { "t0" } else { "t1" };
                dispatcher.dispatch(tenant, PushFrame::new(format!("{{\"seq\":{seq}}}")));
                tokio::task::yield_now().await;
            }
        })
    };

    for worker in workers {
        worker.await.expect("worker");
    }
    producer.await.expect("producer");

    assert_eq!(registry.total_connections(), 0);
    assert_eq!(registry.connection_count("t0"), 0);
    assert_eq!(registry.tenant_count(), 0);
}

#[tokio::test]
async fn tenants_do_not_see_each_others_events() {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Dispatcher::new(registry.clone());
    let (a, mut a_rx) = Connection::open("t1", "u1", 4);
    let (b, mut b_rx) = Connection::open("t2", "u2", 4);
    let _a_guard = registry.admit_guarded(&a);
    let _b_guard = registry.admit_guarded(&b);

    let report = dispatcher.dispatch("t1", PushFrame::new("hello"));
    assert_eq!(report.delivered, 1);
    assert_eq!(a_rx.recv().await.expect("frame").text(), "hello");
    assert!(b_rx.try_recv().is_err());
}
