//! Integration tests for the request pipeline
//!
//! Drives `Pipeline` against a local mock provider and checks the ordering of
//! admission, validation, caching and upstream calls.

mod support;

use std::sync::Arc;
use std::time::Duration;

use places_proxy::config::ProxyConfig;
use places_proxy::error::ProxyError;
use places_proxy::limiter::{LimitScope, WindowLimit};
use places_proxy::pipeline::{CacheStatus, DetailsRequest, Pipeline, RequestContext, SearchRequest};
use support::{spawn_provider, test_config, Behavior, AUTOCOMPLETE_OK, DETAILS_OK, ZERO_RESULTS};

fn ctx<'a>(client_id: &'a str, request_id: &'a str) -> RequestContext<'a> {
    RequestContext {
        client_id,
        request_id,
    }
}

fn search(input: &str) -> SearchRequest {
    SearchRequest {
        input: Some(input.to_string()),
        ..Default::default()
    }
}

fn details(place_id: &str) -> DetailsRequest {
    DetailsRequest {
        place_id: Some(place_id.to_string()),
        session_token: None,
    }
}

fn pipeline(config: &ProxyConfig) -> Pipeline {
    Pipeline::from_config(config).expect("Test config should be valid")
}

#[tokio::test]
async fn test_second_identical_request_is_cache_hit() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let pipeline = pipeline(&test_config(&provider.base_url()));

    let first = pipeline.search(ctx("a", "r1"), search("123 Main St")).await.unwrap();
    let second = pipeline.search(ctx("a", "r2"), search("123 Main St")).await.unwrap();

    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(second.cache, CacheStatus::Hit);
    assert_eq!(first.data, second.data);
    assert_eq!(second.request_id, "r2");
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_details_hit_returns_identical_record() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let pipeline = pipeline(&test_config(&provider.base_url()));

    let first = pipeline.details(ctx("a", "r1"), details("ChIJ-main-st")).await.unwrap();
    let second = pipeline.details(ctx("a", "r2"), details("ChIJ-main-st")).await.unwrap();

    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(second.cache, CacheStatus::Hit);
    assert_eq!(first.data, second.data);
    assert!(first.data.is_some());
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_search_and_details_keys_do_not_collide() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let pipeline = pipeline(&test_config(&provider.base_url()));

    let searched = pipeline.search(ctx("a", "r1"), search("123 Main St")).await.unwrap();
    let detailed = pipeline.details(ctx("a", "r2"), details("123 Main St")).await.unwrap();

    assert_eq!(searched.cache, CacheStatus::Miss);
    assert_eq!(detailed.cache, CacheStatus::Miss);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(pipeline.cache().len(), 2);
}

#[tokio::test]
async fn test_query_normalization_shares_cache_entry() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let pipeline = pipeline(&test_config(&provider.base_url()));

    pipeline.search(ctx("a", "r1"), search("123 Main St")).await.unwrap();
    let second = pipeline.search(ctx("a", "r2"), search("  123  MAIN st ")).await.unwrap();

    assert_eq!(second.cache, CacheStatus::Hit);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_forwarded_query_matches_cache_key_regardless_of_casing() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let pipeline = pipeline(&test_config(&provider.base_url()));

    pipeline.search(ctx("a", "r1"), search("MAIN Street")).await.unwrap();
    let second = pipeline.search(ctx("a", "r2"), search("main street")).await.unwrap();

    assert_eq!(second.cache, CacheStatus::Hit);
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].query.get("input").map(String::as_str), Some("main street"));
}

#[tokio::test]
async fn test_limit_applies_to_cached_results() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let pipeline = pipeline(&test_config(&provider.base_url()));

    let one = SearchRequest {
        limit: Some("1".to_string()),
        ..search("main")
    };
    let three = SearchRequest {
        limit: Some("3".to_string()),
        ..search("main")
    };

    let first = pipeline.search(ctx("a", "r1"), one).await.unwrap();
    let second = pipeline.search(ctx("a", "r2"), three).await.unwrap();

    assert_eq!(first.data.len(), 1);
    assert_eq!(second.data.len(), 3);
    assert_eq!(second.cache, CacheStatus::Hit);
}

#[tokio::test]
async fn test_empty_results_are_cached() {
    let provider = spawn_provider(Behavior::Json(ZERO_RESULTS), Behavior::Json(ZERO_RESULTS)).await;
    let pipeline = pipeline(&test_config(&provider.base_url()));

    let first = pipeline.search(ctx("a", "r1"), search("zzzz")).await.unwrap();
    let second = pipeline.search(ctx("a", "r2"), search("zzzz")).await.unwrap();

    assert!(first.data.is_empty());
    assert_eq!(second.cache, CacheStatus::Hit);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_validation_failure_skips_cache_and_upstream() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let pipeline = pipeline(&test_config(&provider.base_url()));

    let err = pipeline.search(ctx("a", "r1"), search("   ")).await.unwrap_err();
    assert!(matches!(err, ProxyError::Validation { field: "input", .. }));

    let err = pipeline.details(ctx("a", "r2"), DetailsRequest::default()).await.unwrap_err();
    assert!(matches!(err, ProxyError::Validation { field: "place_id", .. }));

    assert_eq!(provider.call_count(), 0);
    assert!(pipeline.cache().is_empty());
    assert_eq!(pipeline.cache().stats().misses, 0, "Validation must not touch the cache");
}

#[tokio::test]
async fn test_upstream_failure_is_not_cached() {
    let provider = spawn_provider(Behavior::Status(503), Behavior::Status(400)).await;
    let pipeline = pipeline(&test_config(&provider.base_url()));

    for request_id in ["r1", "r2"] {
        let err = pipeline.search(ctx("a", request_id), search("main")).await.unwrap_err();
        match err {
            ProxyError::Upstream(upstream) => assert!(upstream.is_retryable()),
            other => panic!("Expected upstream error, got {:?}", other),
        }
    }
    assert_eq!(provider.call_count(), 2, "Failures must not be cached");

    let err = pipeline.details(ctx("a", "r3"), details("x")).await.unwrap_err();
    match err {
        ProxyError::Upstream(upstream) => {
            assert!(!upstream.is_retryable());
            assert_eq!(upstream.http_status(), Some(400));
        }
        other => panic!("Expected upstream error, got {:?}", other),
    }
    assert!(pipeline.cache().is_empty());
}

#[tokio::test]
async fn test_client_limit_rejects_before_any_work() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let config = ProxyConfig {
        client_limit: WindowLimit::new(3, Duration::from_secs(60)),
        ..test_config(&provider.base_url())
    };
    let pipeline = pipeline(&config);

    for i in 0..3 {
        let request_id = format!("r{}", i);
        pipeline.search(ctx("10.0.0.1", &request_id), search("main")).await.unwrap();
    }

    let err = pipeline.search(ctx("10.0.0.1", "r4"), search("main")).await.unwrap_err();
    match err {
        ProxyError::RateLimited(limit) => {
            assert_eq!(limit.scope, LimitScope::Client);
            assert!(limit.retry_after_secs >= 1 && limit.retry_after_secs <= 60);
        }
        other => panic!("Expected rate limit, got {:?}", other),
    }

    // Another client is unaffected
    assert!(pipeline.search(ctx("10.0.0.2", "r5"), search("main")).await.is_ok());
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_invalid_requests_count_against_admission() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let config = ProxyConfig {
        client_limit: WindowLimit::new(1, Duration::from_secs(60)),
        ..test_config(&provider.base_url())
    };
    let pipeline = pipeline(&config);

    assert!(matches!(
        pipeline.search(ctx("a", "r1"), search("")).await,
        Err(ProxyError::Validation { .. })
    ));
    assert!(matches!(
        pipeline.search(ctx("a", "r2"), search("main")).await,
        Err(ProxyError::RateLimited(_))
    ));
}

#[tokio::test]
async fn test_global_limit_rejects_client_under_its_own_limit() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let config = ProxyConfig {
        global_limit: WindowLimit::new(1, Duration::from_secs(60)),
        client_limit: WindowLimit::new(10, Duration::from_secs(60)),
        ..test_config(&provider.base_url())
    };
    let pipeline = pipeline(&config);

    pipeline.search(ctx("a", "r1"), search("main")).await.unwrap();
    let err = pipeline.details(ctx("b", "r2"), details("ChIJ-main-st")).await.unwrap_err();

    match err {
        ProxyError::RateLimited(limit) => assert_eq!(limit.scope, LimitScope::Global),
        other => panic!("Expected rate limit, got {:?}", other),
    }
    assert_eq!(pipeline.limiter().tracked_clients(), 1, "Client b must not be counted");
}

#[tokio::test]
async fn test_expired_entry_triggers_fresh_upstream_call() {
    let provider = spawn_provider(Behavior::Json(AUTOCOMPLETE_OK), Behavior::Json(DETAILS_OK)).await;
    let config = ProxyConfig {
        search_ttl: Duration::from_millis(150),
        ..test_config(&provider.base_url())
    };
    let pipeline = pipeline(&config);

    pipeline.search(ctx("a", "r1"), search("main")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let again = pipeline.search(ctx("a", "r2"), search("main")).await.unwrap();

    assert_eq!(again.cache, CacheStatus::Miss);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_concurrent_misses_each_reach_upstream() {
    let provider = spawn_provider(
        Behavior::Slow(Duration::from_millis(200), AUTOCOMPLETE_OK),
        Behavior::Json(DETAILS_OK),
    )
    .await;
    let pipeline = Arc::new(pipeline(&test_config(&provider.base_url())));

    let tasks: Vec<_> = ["r1", "r2"]
        .into_iter()
        .map(|request_id| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline.search(ctx("a", request_id), search("main")).await
            })
        })
        .collect();

    for task in tasks {
        let served = task.await.expect("Task panicked").expect("Search should succeed");
        assert_eq!(served.cache, CacheStatus::Miss);
    }
    assert_eq!(provider.call_count(), 2);
    assert_eq!(pipeline.cache().len(), 1);
}
