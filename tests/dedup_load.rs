//! Concurrency tests for request deduplication under load.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;

use fanout_guard::config::RegistryConfig;
use fanout_guard::orchestrator::handler_fn;
use fanout_guard::resilience::CircuitBreakerConfig;
use fanout_guard::QueryRequest;

mod common;

const DOMAINS: [&str; 3] = ["kbli", "regulatory", "pricing"];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_run_each_domain_once() {
    let h = common::harness(
        CircuitBreakerConfig::default(),
        RegistryConfig::default(),
        Duration::from_secs(2),
    );

    let counters: Vec<Arc<AtomicU32>> = DOMAINS.iter().map(|_| Arc::new(AtomicU32::new(0))).collect();
    for (domain, counter) in DOMAINS.iter().zip(&counters) {
        let counter = counter.clone();
        let name = domain.to_string();
        h.orchestrator.register_local(
            *domain,
            handler_fn(move |req: QueryRequest| {
                let counter = counter.clone();
                let name = name.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!({ "domain": name, "query": req.query }))
                }
            }),
        );
    }

    let orchestrator = Arc::new(h.orchestrator);
    let domains: Vec<String> = DOMAINS.iter().map(|d| d.to_string()).collect();

    let tasks: Vec<_> = (0..200)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            let domains = domains.clone();
            // Case and surrounding whitespace do not change the cache key.
            let query = if i % 2 == 0 { "Coffee Shop" } else { "  coffee shop " };
            tokio::spawn(async move { orchestrator.query(QueryRequest::new(query), &domains).await })
        })
        .collect();

    for response in join_all(tasks).await {
        let response = response.unwrap();
        assert_eq!(response.succeeded, domains);
        assert!(response.failed.is_empty());
    }

    for (domain, counter) in DOMAINS.iter().zip(&counters) {
        assert_eq!(counter.load(Ordering::SeqCst), 1, "domain {domain} executed more than once");
    }

    let metrics = orchestrator.cache().metrics();
    assert_eq!(metrics.misses, 3);
    assert_eq!(metrics.hits + metrics.dedup_joins, 200 * 3 - 3);
    assert_eq!(metrics.inflight, 0);
    assert_eq!(metrics.local_entries, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_remote_queries_hit_backend_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let cc = calls.clone();
    let backend = common::start_programmable_backend(move |_path| {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(150)).await;
            (200, r#"{"rules": ["halal", "permit"]}"#.into())
        }
    })
    .await;

    let h = common::harness(
        CircuitBreakerConfig::default(),
        RegistryConfig::default(),
        Duration::from_secs(2),
    );
    h.registry.register_service(common::instance("r1", "rules-svc", backend));
    h.orchestrator.register_remote("business_rules", "rules-svc", "/query");

    let orchestrator = Arc::new(h.orchestrator);
    let domains = vec!["business_rules".to_string()];
    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let domains = domains.clone();
            tokio::spawn(async move {
                orchestrator
                    .query(QueryRequest::new("restaurant"), &domains)
                    .await
            })
        })
        .collect();

    for response in join_all(tasks).await {
        let response = response.unwrap();
        assert_eq!(
            response.results[0].result,
            Some(json!({"rules": ["halal", "permit"]}))
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_queries_are_not_merged() {
    let h = common::harness(
        CircuitBreakerConfig::default(),
        RegistryConfig::default(),
        Duration::from_secs(2),
    );
    let calls = Arc::new(AtomicU32::new(0));
    let cc = calls.clone();
    h.orchestrator.register_local(
        "kbli",
        handler_fn(move |req: QueryRequest| {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!({ "code": req.query }))
            }
        }),
    );

    let orchestrator = Arc::new(h.orchestrator);
    let domains = vec!["kbli".to_string()];
    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            let domains = domains.clone();
            tokio::spawn(async move {
                orchestrator
                    .query(QueryRequest::new(format!("query-{}", i % 10)), &domains)
                    .await
            })
        })
        .collect();

    for response in join_all(tasks).await {
        assert!(response.unwrap().failed.is_empty());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}
