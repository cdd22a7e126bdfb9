#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use praetor_engine::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
decision_cache:
  enabled: true
  capacty: 100 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.expression_cache.capacity, 1000);
    assert_eq!(cfg.expression_cache.ttl_secs, 3600);
    assert!(!cfg.decision_cache.enabled);
    assert_eq!(cfg.evaluation.parallel_workers, 4);
    assert!(cfg.evaluation.check_timeout().is_none());
    assert_eq!(cfg.logging.filter, "info");
}

#[test]
fn full_config_round_trips_into_limits() {
    let ok = r#"
version: 1
expression_cache: { capacity: 50, ttl_secs: 10 }
decision_cache: { enabled: true, capacity: 500, ttl_secs: 5 }
evaluation:
  parallel_workers: 8
  parallel_threshold: 3
  check_timeout_ms: 250
  max_expression_len: 1024
  max_expression_depth: 32
  max_eval_steps: 5000
  regex_size_limit: 65536
logging:
  filter: "praetor_engine=debug"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    let limits = cfg.evaluation.limits();
    assert_eq!(limits.max_len, 1024);
    assert_eq!(limits.max_depth, 32);
    assert_eq!(limits.max_steps, 5000);
    assert_eq!(cfg.evaluation.check_timeout().unwrap().as_millis(), 250);
    assert_eq!(cfg.decision_cache.ttl().as_secs(), 5);
}

#[test]
fn unsupported_version() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "UNSUPPORTED_VERSION");
}

#[test]
fn bounds_are_enforced() {
    for bad in [
        "version: 1\nexpression_cache: { capacity: 0 }\n",
        "version: 1\nexpression_cache: { ttl_secs: 90000 }\n",
        "version: 1\ndecision_cache: { capacity: 0 }\n",
        "version: 1\nevaluation: { parallel_workers: 0 }\n",
        "version: 1\nevaluation: { parallel_workers: 1000 }\n",
        "version: 1\nevaluation: { check_timeout_ms: 0 }\n",
        "version: 1\nevaluation: { max_expression_depth: 1 }\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "CONFIG", "{bad}");
    }
}

#[test]
fn default_config_is_valid() {
    config::EngineConfig::default().validate().unwrap();
}

#[test]
fn missing_file_is_config_error() {
    let err = config::load_from_file("/nonexistent/praetor.yaml").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn logging_section_drives_tracing_init() {
    let cfg = config::load_from_str("version: 1\nlogging:\n  filter: \"praetor_engine=debug\"\n").unwrap();
    assert_eq!(cfg.logging.filter, "praetor_engine=debug");
    // Second call finds a subscriber already installed and is a no-op.
    praetor_engine::obs::init_tracing(&cfg.logging);
    praetor_engine::obs::init_tracing(&cfg.logging);
}
