//! Tests for configuration loading and validation

use std::collections::HashMap;
use std::time::Duration;

use adaptive_resource_manager::config::{ManagerConfig, PoolLimits, PredictorConfig};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name: &str| vars.get(name).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = ManagerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.scheduler_interval(), Duration::from_millis(100));
    assert_eq!(cfg.aging_interval(), Duration::from_secs(60));
    assert_eq!(cfg.token_window(), Duration::from_secs(60));
    assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(30));
    assert!(cfg.preemption_enabled);
    assert!((cfg.preemption_threshold - 0.9).abs() < f64::EPSILON);
    assert!((cfg.aging_step - 1.0).abs() < f64::EPSILON);
    assert_eq!(cfg.limits, PoolLimits::default());
    assert_eq!(cfg.predictor, PredictorConfig::default());
}

#[test]
fn test_builder_setters() {
    let cfg = ManagerConfig::new()
        .with_scheduler_interval(Duration::from_millis(25))
        .with_aging(Duration::from_secs(5), 2.0)
        .with_token_window(Duration::from_secs(10))
        .with_preemption(false, 0.75)
        .with_shutdown_timeout(Duration::from_secs(3))
        .with_event_capacity(16);
    assert_eq!(cfg.scheduler_interval_ms, 25);
    assert_eq!(cfg.aging_interval_ms, 5_000);
    assert!((cfg.aging_step - 2.0).abs() < f64::EPSILON);
    assert_eq!(cfg.token_window_ms, 10_000);
    assert!(!cfg.preemption_enabled);
    assert_eq!(cfg.shutdown_timeout_ms, 3_000);
    assert_eq!(cfg.event_capacity, 16);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_invalid_values_are_rejected() {
    let zero_tick = ManagerConfig::default().with_scheduler_interval(Duration::ZERO);
    assert!(zero_tick.validate().is_err());

    let bad_threshold = ManagerConfig::default().with_preemption(true, 1.2);
    assert!(bad_threshold.validate().is_err());

    let bad_step = ManagerConfig::default().with_aging(Duration::from_secs(1), 0.0);
    assert!(bad_step.validate().is_err());

    let no_slots = ManagerConfig::default().with_limits(PoolLimits {
        max_concurrent_tasks: 0,
        ..PoolLimits::default()
    });
    let err = no_slots.validate().unwrap_err();
    assert!(err.starts_with("limits:"));
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = ManagerConfig::from_json_str(
        r#"{ "limits": { "max_cpu": 400.0 }, "aging_step": 5.0, "preemption_enabled": false }"#,
    )
    .unwrap();
    assert!((cfg.limits.max_cpu - 400.0).abs() < f64::EPSILON);
    assert_eq!(cfg.limits.max_concurrent_tasks, 10);
    assert!((cfg.aging_step - 5.0).abs() < f64::EPSILON);
    assert!(!cfg.preemption_enabled);
    assert_eq!(cfg.scheduler_interval_ms, 100);

    assert!(ManagerConfig::from_json_str("{ not json").is_err());
    assert!(ManagerConfig::from_json_str(r#"{ "event_capacity": 0 }"#).is_err());
}

#[test]
fn test_from_lookup_overrides_defaults() {
    let cfg = ManagerConfig::from_lookup(lookup(&[
        ("ARM_MAX_CPU", "250"),
        ("ARM_MAX_CONCURRENT_TASKS", " 4 "),
        ("ARM_SCHEDULER_INTERVAL_MS", "20"),
        ("ARM_PREEMPTION_ENABLED", "false"),
        ("ARM_PREEMPTION_THRESHOLD", "0.8"),
        ("ARM_HISTORY_LIMIT", "50"),
    ]))
    .unwrap();
    assert!((cfg.limits.max_cpu - 250.0).abs() < f64::EPSILON);
    assert_eq!(cfg.limits.max_concurrent_tasks, 4);
    assert_eq!(cfg.scheduler_interval_ms, 20);
    assert!(!cfg.preemption_enabled);
    assert!((cfg.preemption_threshold - 0.8).abs() < f64::EPSILON);
    assert_eq!(cfg.predictor.history_limit, 50);
    assert_eq!(cfg.aging_interval_ms, 60_000);
}

#[test]
fn test_from_lookup_reports_bad_values() {
    let err = ManagerConfig::from_lookup(lookup(&[("ARM_MAX_MEMORY", "lots")])).unwrap_err();
    assert!(err.to_string().contains("ARM_MAX_MEMORY"));

    let err = ManagerConfig::from_lookup(lookup(&[("ARM_AGING_INTERVAL_MS", "0")])).unwrap_err();
    assert!(err.to_string().contains("aging_interval_ms"));
}

#[test]
fn test_config_round_trips_through_json() {
    let cfg = ManagerConfig::default().with_preemption(true, 0.6);
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(ManagerConfig::from_json_str(&json).unwrap(), cfg);
}
