//! Integration tests for service coordination
//!
//! These tests run discovery, configuration, and resilient calls against a
//! local mock HTTP server standing in for downstream services.
//!
//! Run with: cargo test --test coordination

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use flotilla_core::breaker::{BreakerConfig, BreakerState, CircuitBreakerRegistry};
use flotilla_core::config::{ConfigServiceConfig, HttpClientConfig};
use flotilla_core::{Config, Environment, HealthCheck, HealthStatus};
use flotilla_coord::{
    ConfigClient, Coordinator, DiscoveryClient, Error, ServiceClient, ServiceRecord,
    ServiceRegistry,
};

/// Discovery client with one record pointing at the mock server
async fn discovery_with(name: &str, server: &MockServer) -> Arc<DiscoveryClient> {
    let discovery = Arc::new(DiscoveryClient::new(Arc::new(ServiceRegistry::new())).unwrap());
    let addr = server.address();
    discovery
        .registry()
        .register(ServiceRecord::new(name, addr.ip().to_string(), addr.port()))
        .await;
    discovery
}

fn config_client(discovery: Arc<DiscoveryClient>) -> ConfigClient {
    let settings = ConfigServiceConfig {
        fetch_timeout_seconds: 2,
        ..ConfigServiceConfig::default()
    };
    ConfigClient::new(discovery, &settings).unwrap()
}

fn fast_http_settings() -> HttpClientConfig {
    HttpClientConfig {
        request_timeout_seconds: 5,
        retries: 3,
        retry_min_delay_ms: 10,
        retry_max_delay_ms: 50,
    }
}

// --- active probing ---

#[tokio::test]
async fn test_probe_refreshes_heartbeat() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
        .mount(&server)
        .await;

    let discovery = Arc::new(
        DiscoveryClient::new(Arc::new(ServiceRegistry::new()))
            .unwrap()
            .with_healthy_window(Duration::from_millis(50)),
    );
    let addr = server.address();
    discovery
        .registry()
        .register(ServiceRecord::new("billing", addr.ip().to_string(), addr.port()))
        .await;

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(discovery.discover("billing").await.is_none());

    // A successful probe counts as a heartbeat
    assert!(discovery.probe("billing").await);
    assert!(discovery.discover("billing").await.is_some());
    assert_eq!(
        discovery.registry().get("billing").await.unwrap().status,
        "healthy"
    );
}

#[tokio::test]
async fn test_probe_non_200_marks_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let discovery = discovery_with("billing", &server).await;
    assert!(!discovery.probe("billing").await);
    assert_eq!(
        discovery.registry().get("billing").await.unwrap().status,
        "unhealthy"
    );
}

#[tokio::test]
async fn test_probe_connection_refused() {
    // Bind a port, then drop the listener so the probe has nothing to reach
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let discovery = Arc::new(DiscoveryClient::new(Arc::new(ServiceRegistry::new())).unwrap());
    discovery
        .registry()
        .register(ServiceRecord::new("billing", addr.ip().to_string(), addr.port()))
        .await;

    assert!(!discovery.probe("billing").await);
    assert_eq!(
        discovery.registry().get("billing").await.unwrap().status,
        "unhealthy"
    );
}

#[tokio::test]
async fn test_probe_timeout_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let discovery = Arc::new(
        DiscoveryClient::new(Arc::new(ServiceRegistry::new()))
            .unwrap()
            .with_probe_timeout(Duration::from_millis(100)),
    );
    let addr = server.address();
    discovery
        .registry()
        .register(ServiceRecord::new("billing", addr.ip().to_string(), addr.port()))
        .await;

    assert!(!discovery.probe("billing").await);
}

#[tokio::test]
async fn test_probe_all_mixed_fleet() {
    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&healthy)
        .await;
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;

    let discovery = discovery_with("billing", &healthy).await;
    let addr = broken.address();
    discovery
        .registry()
        .register(ServiceRecord::new("orders", addr.ip().to_string(), addr.port()))
        .await;

    let results = discovery.probe_all().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results.get("billing"), Some(&true));
    assert_eq!(results.get("orders"), Some(&false));
}

// --- configuration values ---

#[tokio::test]
async fn test_get_value_service_scope_wins() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/value/db_url"))
        .and(query_param("service_name", "orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "db_url",
            "value": "postgres://orders-primary"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/value/db_url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "db_url",
            "value": "postgres://shared"
        })))
        .expect(0)
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    let value = client
        .get_value("db_url", Environment::Production, Some("orders"), json!(null))
        .await;

    assert_eq!(value, json!("postgres://orders-primary"));
    server.verify().await;
}

#[tokio::test]
async fn test_get_value_falls_back_to_global_scope() {
    let server = MockServer::start().await;
    // The service-scoped entry exists but carries no value
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/value/db_url"))
        .and(query_param("service_name", "orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "db_url",
            "value": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/value/db_url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "db_url",
            "value": "postgres://shared"
        })))
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    let value = client
        .get_value("db_url", Environment::Production, Some("orders"), json!(null))
        .await;

    assert_eq!(value, json!("postgres://shared"));
}

#[tokio::test]
async fn test_get_value_absent_everywhere_caches_default() {
    let server = MockServer::start().await;
    // One 404 for the service scope, one for the global retry
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/value/batch_size"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    let first = client
        .get_value("batch_size", Environment::Production, Some("orders"), json!(50))
        .await;
    let second = client
        .get_value("batch_size", Environment::Production, Some("orders"), json!(50))
        .await;

    assert_eq!(first, json!(50));
    assert_eq!(second, json!(50));
    // The second read was served from cache
    server.verify().await;
}

#[tokio::test]
async fn test_get_value_server_error_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/value/db_url"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    let value = client
        .get_value("db_url", Environment::Production, None, json!("fallback"))
        .await;
    assert_eq!(value, json!("fallback"));

    // Once the service recovers the real value comes through immediately
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/value/db_url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "db_url",
            "value": "postgres://primary"
        })))
        .mount(&server)
        .await;

    let value = client
        .get_value("db_url", Environment::Production, None, json!("fallback"))
        .await;
    assert_eq!(value, json!("postgres://primary"));
}

#[tokio::test]
async fn test_get_value_with_undiscoverable_config_service() {
    let discovery = Arc::new(DiscoveryClient::new(Arc::new(ServiceRegistry::new())).unwrap());
    let client = config_client(discovery);

    let value = client
        .get_value("db_url", Environment::Production, None, json!("fallback"))
        .await;
    assert_eq!(value, json!("fallback"));
    assert!(client.get_bulk(Environment::Production, None).await.is_empty());
    assert!(
        !client
            .is_feature_enabled("new-ui", Some("u1"), Environment::Production)
            .await
    );
}

#[tokio::test]
async fn test_get_bulk_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/bulk"))
        .and(query_param("environment", "production"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "configurations": {
                "db_url": "postgres://shared",
                "batch_size": 50
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    let bulk = client.get_bulk(Environment::Production, None).await;
    assert_eq!(bulk.len(), 2);
    assert_eq!(bulk.get("batch_size"), Some(&json!(50)));

    // Snapshot is cached as a whole
    let again = client.get_bulk(Environment::Production, None).await;
    assert_eq!(again.len(), 2);
    server.verify().await;
}

#[tokio::test]
async fn test_get_entry_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/key/db_url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "config_key": "db_url",
            "config_value": "postgres://orders-primary",
            "environment": "production",
            "service_name": "orders",
            "is_sensitive": true,
            "version": 7
        })))
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    let entry = client
        .get_entry("db_url", Environment::Production, Some("orders"))
        .await
        .unwrap();

    assert_eq!(entry.config_key, "db_url");
    assert_eq!(entry.version, 7);
    assert!(entry.is_sensitive);
    assert!(!entry.is_global());

    let missing = client
        .get_entry("nope", Environment::Production, None)
        .await;
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_clear_cache_forces_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/value/db_url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "db_url",
            "value": "postgres://shared"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    client
        .get_value("db_url", Environment::Production, None, json!(null))
        .await;
    client.clear_cache();
    client
        .get_value("db_url", Environment::Production, None, json!(null))
        .await;

    server.verify().await;
}

// --- feature flags ---

#[tokio::test]
async fn test_flag_verdict_is_cached_per_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feature-flags/check/new-ui"))
        .and(query_param("user_id", "u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "flag_key": "new-ui",
            "enabled": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    assert!(
        client
            .is_feature_enabled("new-ui", Some("u1"), Environment::Production)
            .await
    );
    assert!(
        client
            .is_feature_enabled("new-ui", Some("u1"), Environment::Production)
            .await
    );
    server.verify().await;
}

#[tokio::test]
async fn test_flag_check_failure_uses_cached_definition() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feature-flags/key/new-ui"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "flag_key": "new-ui",
            "is_enabled": true,
            "environment": "production",
            "rollout_percentage": 100
        })))
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);

    // Prime the definition cache, then break the service
    let eval = client
        .evaluate_flag("new-ui", Some("u1"), Environment::Production)
        .await;
    assert!(eval.enabled);

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feature-flags/check/new-ui"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(
        client
            .is_feature_enabled("new-ui", Some("u1"), Environment::Production)
            .await
    );
}

#[tokio::test]
async fn test_flag_check_failure_without_cache_is_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feature-flags/check/new-ui"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    assert!(
        !client
            .is_feature_enabled("new-ui", Some("u1"), Environment::Production)
            .await
    );
}

#[tokio::test]
async fn test_evaluate_flag_reports_rollout_reason() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feature-flags/key/beta-search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "flag_key": "beta-search",
            "is_enabled": true,
            "environment": "production",
            "rollout_percentage": 40
        })))
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    let eval = client
        .evaluate_flag("beta-search", Some("user-7"), Environment::Production)
        .await;

    assert_eq!(eval.rollout_percentage, 40);
    assert!(eval.reason.contains("rollout"));
    // The verdict must be reproducible for the same user
    let again = client
        .evaluate_flag("beta-search", Some("user-7"), Environment::Production)
        .await;
    assert_eq!(eval.enabled, again.enabled);
}

#[tokio::test]
async fn test_evaluate_unknown_flag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feature-flags/key/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = config_client(discovery_with("config-service", &server).await);
    let eval = client
        .evaluate_flag("ghost", None, Environment::Production)
        .await;

    assert!(!eval.enabled);
    assert_eq!(eval.reason, "flag not found");
}

// --- resilient service-to-service calls ---

#[tokio::test]
async fn test_get_json_from_discovered_service() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1, 2, 3]})))
        .mount(&server)
        .await;

    let discovery = discovery_with("inventory", &server).await;
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let client = ServiceClient::new(discovery, breakers, &fast_http_settings()).unwrap();

    let body = client.get_json("inventory", "/api/v1/items").await.unwrap();
    assert_eq!(body["items"], json!([1, 2, 3]));
}

#[tokio::test]
async fn test_post_json_carries_correlation_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "ord-1"})))
        .mount(&server)
        .await;

    let discovery = discovery_with("orders", &server).await;
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let client = ServiceClient::new(discovery, breakers, &fast_http_settings()).unwrap();

    let body = client
        .post_json("orders", "/api/v1/orders", &json!({"sku": "A-1"}))
        .await
        .unwrap();
    assert_eq!(body["id"], json!("ord-1"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("x-correlation-id").is_some());
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/items"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let discovery = discovery_with("inventory", &server).await;
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let client = ServiceClient::new(discovery, breakers, &fast_http_settings()).unwrap();

    let body = client.get_json("inventory", "/api/v1/items").await.unwrap();
    assert_eq!(body["items"], json!([]));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/items"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let discovery = discovery_with("inventory", &server).await;
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let client = ServiceClient::new(discovery, breakers, &fast_http_settings()).unwrap();

    let err = client.get_json("inventory", "/api/v1/items").await.unwrap_err();
    assert!(matches!(err, Error::UnexpectedStatus { status: 404, .. }));
    server.verify().await;
}

#[tokio::test]
async fn test_unknown_target_is_unavailable() {
    let discovery = Arc::new(DiscoveryClient::new(Arc::new(ServiceRegistry::new())).unwrap());
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let client = ServiceClient::new(discovery, breakers, &fast_http_settings()).unwrap();

    let err = client.get_json("ghost", "/api/v1/items").await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/items"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let discovery = discovery_with("inventory", &server).await;
    let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig {
        failure_threshold: 2,
        open_timeout: Duration::from_secs(60),
    }));
    let client = ServiceClient::new(discovery, breakers.clone(), &fast_http_settings()).unwrap();

    for _ in 0..2 {
        let err = client.get_json("inventory", "/api/v1/items").await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedStatus { status: 500, .. }));
    }
    assert_eq!(breakers.breaker("inventory").state(), BreakerState::Open);

    let sent_before = server.received_requests().await.unwrap().len();
    let err = client.get_json("inventory", "/api/v1/items").await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    // Fail-fast: no request went out
    assert_eq!(server.received_requests().await.unwrap().len(), sent_before);
}

#[tokio::test]
async fn test_breaker_recovers_after_cooldown() {
    let server = MockServer::start().await;
    // Enough failures for one retried call, then the service recovers
    Mock::given(method("GET"))
        .and(path("/api/v1/items"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(4)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let discovery = discovery_with("inventory", &server).await;
    let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig {
        failure_threshold: 1,
        open_timeout: Duration::from_millis(200),
    }));
    let client = ServiceClient::new(discovery, breakers.clone(), &fast_http_settings()).unwrap();

    client.get_json("inventory", "/api/v1/items").await.unwrap_err();
    assert_eq!(breakers.breaker("inventory").state(), BreakerState::Open);

    let err = client.get_json("inventory", "/api/v1/items").await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));

    tokio::time::sleep(Duration::from_millis(250)).await;
    let body = client.get_json("inventory", "/api/v1/items").await.unwrap();
    assert_eq!(body["items"], json!([]));
    assert_eq!(breakers.breaker("inventory").state(), BreakerState::Closed);
}

// --- full stack ---

#[tokio::test]
async fn test_coordinator_full_stack() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configurations/value/batch_size"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "batch_size",
            "value": 25
        })))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.service.name = "orders".to_string();
    config.service.port = 9005;

    let mut coordinator = Coordinator::new(config).unwrap();
    coordinator.start().await;

    // Make the configuration service discoverable inside this coordinator
    let addr = server.address();
    coordinator
        .registry()
        .register(ServiceRecord::new(
            "config-service",
            addr.ip().to_string(),
            addr.port(),
        ))
        .await;

    let value = coordinator
        .config_client()
        .get_value("batch_size", Environment::Development, None, json!(10))
        .await;
    assert_eq!(value, json!(25));

    coordinator
        .health()
        .add_check(HealthCheck::from_bool("startup", || async { true }))
        .await;
    let overall = coordinator.health().overall_health(false).await;
    assert_eq!(overall.status, HealthStatus::Healthy);
    assert_eq!(overall.service, "orders");

    coordinator.shutdown().await;
    assert!(coordinator.registry().get("orders").await.is_none());
}
