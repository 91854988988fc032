//! Resilience monitor cycles, alerting and operator interventions over a full core.

use pipeline_core::config::ConfigurationError;
use pipeline_core::resilience::{AlertKind, AlertSeverity, HealthStatus, ServiceIdentity};
use pipeline_core::test_helpers::TestPipeline;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_high_failure_rate_alert_without_tripping_breaker() {
    let pipeline = TestPipeline::new();
    let manager = pipeline.core.resilience();

    for attempt in 0..4 {
        let _ = manager
            .execute_with_resilience(ServiceIdentity::OpenAi, "summarize", || async move {
                if attempt % 2 == 0 {
                    Err("model overloaded".to_string())
                } else {
                    Ok(())
                }
            })
            .await;
    }

    let report = pipeline.core.monitor().run_cycle().await;
    let openai: Vec<_> = report
        .raised
        .iter()
        .filter(|alert| alert.service == ServiceIdentity::OpenAi)
        .collect();
    assert_eq!(openai.len(), 1);
    assert_eq!(openai[0].kind, AlertKind::HighFailureRate);
    assert_eq!(openai[0].severity, AlertSeverity::Critical);
    assert!((openai[0].value - 0.5).abs() < f64::EPSILON);

    let health = pipeline
        .core
        .monitor()
        .get_service_health(ServiceIdentity::OpenAi)
        .await
        .unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.metrics.window_calls, 4);
    assert_eq!(health.active_alerts, vec![AlertKind::HighFailureRate]);
    assert_eq!(
        health.metrics.circuit_state,
        pipeline_core::resilience::CircuitState::Closed
    );

    // Samples age out of the window and the alert resolves
    pipeline.advance(Duration::from_secs(3601));
    let report = pipeline.core.monitor().run_cycle().await;
    assert!(report
        .resolved
        .iter()
        .any(|resolved| resolved.service == ServiceIdentity::OpenAi
            && resolved.kind == AlertKind::HighFailureRate));
}

#[tokio::test]
async fn test_saturated_bulkhead_raises_warning() {
    let pipeline = TestPipeline::new();
    let monitor = pipeline.core.monitor();
    monitor
        .adjust_bulkhead_limits(ServiceIdentity::Vault, Some(1), Some(1))
        .unwrap();

    let bulkhead = Arc::clone(
        &pipeline
            .core
            .resilience()
            .service(ServiceIdentity::Vault)
            .unwrap()
            .bulkhead,
    );
    let held = bulkhead.acquire().await.unwrap();
    let waiter = {
        let bulkhead = Arc::clone(&bulkhead);
        tokio::spawn(async move { bulkhead.acquire().await.map(|_permit| ()) })
    };
    while bulkhead.stats().queue_length == 0 {
        tokio::task::yield_now().await;
    }

    let report = monitor.run_cycle().await;
    let vault: Vec<_> = report
        .raised
        .iter()
        .filter(|alert| alert.service == ServiceIdentity::Vault)
        .collect();
    assert_eq!(vault.len(), 1);
    assert_eq!(vault[0].kind, AlertKind::BulkheadSaturation);
    assert_eq!(vault[0].severity, AlertSeverity::Warning);

    let health = monitor.get_service_health(ServiceIdentity::Vault).await.unwrap();
    assert_eq!(health.status, HealthStatus::Degraded);

    drop(held);
    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_operator_interventions() {
    let pipeline = TestPipeline::new();
    let monitor = pipeline.core.monitor();
    let breaker = &pipeline
        .core
        .resilience()
        .service(ServiceIdentity::Ghost)
        .unwrap()
        .circuit_breaker;

    breaker.force_open().await;
    assert!(!breaker.can_execute().await);

    let record = monitor.reset_circuit_breaker(ServiceIdentity::Ghost).await.unwrap();
    assert_eq!(record.failure_count, 0);
    assert!(breaker.can_execute().await);

    let mut config = pipeline_core::config::PipelineConfig::default();
    config.resilience.services.remove(&ServiceIdentity::Vault);
    let partial = TestPipeline::with_config(config);
    assert!(matches!(
        partial
            .core
            .monitor()
            .reset_circuit_breaker(ServiceIdentity::Vault)
            .await,
        Err(ConfigurationError::UnknownService(_))
    ));
    assert!(matches!(
        partial
            .core
            .monitor()
            .get_service_health(ServiceIdentity::Vault)
            .await,
        Err(ConfigurationError::UnknownService(_))
    ));
}

#[tokio::test]
async fn test_shutdown_flushes_a_final_cycle() {
    let pipeline = TestPipeline::new();
    let since = pipeline.clock.now();

    let mut handle = pipeline.core.start_background_tasks();
    handle.shutdown().await.unwrap();

    let history = pipeline
        .core
        .monitor()
        .metrics_history(ServiceIdentity::Reddit, since)
        .await
        .unwrap();
    assert!(!history.is_empty());
}
