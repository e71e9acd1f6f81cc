use stealjobs::{JobSystem, JobSystemConfig, JobSystemError, PinningStrategy};

#[test]
fn test_from_json_fills_defaults() {
    let config = JobSystemConfig::from_json(r#"{ "worker_threads": 2 }"#).unwrap();
    assert_eq!(config.worker_threads, 2);
    assert_eq!(config.ring_capacity, 4096);
    assert_eq!(config.max_workers, 64);
    assert_eq!(config.pinning, PinningStrategy::None);
    assert_eq!(config.thread_name, "stealjobs-worker");
    assert_eq!(config.stack_size, None);
}

#[test]
fn test_from_json_full() {
    let json = r#"{
        "worker_threads": 3,
        "ring_capacity": 256,
        "max_workers": 8,
        "pinning": "Linear",
        "thread_name": "physics",
        "stack_size": 1048576
    }"#;
    let config = JobSystemConfig::from_json(json).unwrap();
    assert_eq!(config.ring_capacity, 256);
    assert_eq!(config.pinning, PinningStrategy::Linear);
    assert_eq!(config.stack_size, Some(1 << 20));

    let job_system = JobSystem::with_config(config).unwrap();
    assert_eq!(job_system.num_workers(), 3);
    assert_eq!(job_system.config().thread_name, "physics");
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_from_json_rejects_malformed_input() {
    assert!(matches!(
        JobSystemConfig::from_json("{ worker_threads: }"),
        Err(JobSystemError::ConfigParse(_))
    ));
    assert!(matches!(
        JobSystemConfig::from_json(r#"{ "pinning": "Sideways" }"#),
        Err(JobSystemError::ConfigParse(_))
    ));
}

#[test]
fn test_from_json_rejects_invalid_values() {
    for json in [
        r#"{ "ring_capacity": 100 }"#,
        r#"{ "ring_capacity": 1 }"#,
        r#"{ "max_workers": 0 }"#,
        r#"{ "worker_threads": 8, "max_workers": 8 }"#,
        r#"{ "stack_size": 0 }"#,
    ] {
        let err = JobSystemConfig::from_json(json).unwrap_err();
        assert!(
            matches!(err, JobSystemError::InvalidConfig(_)),
            "{json} gave {err}"
        );
    }
}

#[test]
fn test_config_round_trips_through_json() {
    let config = JobSystemConfig {
        pinning: PinningStrategy::AvoidSMT,
        ..JobSystemConfig::with_threads(1)
    };
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(JobSystemConfig::from_json(&json).unwrap(), config);
}
