// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::deadlock::ResolutionPolicy;
use std::io::Write;
use yare::parameterized;

#[test]
fn empty_file_is_valid_defaults() {
    let config = EngineConfig::from_toml("").unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.locking.backend, BackendKind::Memory);
    assert_eq!(config.locking.compatibility_mode, CompatibilityMode::Hybrid);
    assert_eq!(config.locking.default_timeout, Duration::from_secs(1800));
    assert_eq!(config.locking.queue.max_size, 100);
    assert_eq!(config.locking.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.locking.cluster.node_ttl(), Duration::from_secs(60));
    assert_eq!(config.locking.cluster.leader_ttl(), Duration::from_secs(20));
}

#[test]
fn nested_tables_override_defaults() {
    let toml = r#"
        [locking]
        backend = "redis"
        default_timeout = "10m"
        compatibility_mode = "native"

        [locking.queue]
        max_size = 5
        starvation_threshold = "90s"

        [locking.retry]
        enabled = false
        max_attempts = 7
        base_delay = "50ms"

        [locking.deadlock]
        resolution_policy = "youngest"

        [locking.circuit_breaker]
        open_timeout = "2m"

        [redis]
        url = "redis://cache:6379/2"
        key_prefix = "atl:"
    "#;
    let config = EngineConfig::from_toml(toml).unwrap();
    let l = &config.locking;
    assert_eq!(l.backend, BackendKind::Redis);
    assert_eq!(l.default_timeout, Duration::from_secs(600));
    assert_eq!(l.compatibility_mode, CompatibilityMode::Native);
    assert_eq!(l.queue.max_size, 5);
    assert_eq!(l.queue.starvation().threshold, Duration::from_secs(90));
    assert_eq!(l.retry.policy.max_attempts, 7);
    assert_eq!(l.retry.policy.base_delay, Duration::from_millis(50));
    assert_eq!(l.retry.effective().max_attempts, 1);
    assert_eq!(l.deadlock.resolution_policy, ResolutionPolicy::Youngest);
    assert_eq!(l.circuit_breaker.open_timeout, Duration::from_secs(120));
    assert_eq!(l.circuit_breaker.recovery_threshold, 3);
    assert_eq!(config.redis.key_prefix, "atl:");
}

#[parameterized(
    zero_default_timeout = { "[locking]\ndefault_timeout = \"0s\"" },
    max_below_default = { "[locking]\ndefault_timeout = \"1h\"\nmax_timeout = \"10m\"" },
    zero_queue = { "[locking.queue]\nmax_size = 0" },
    zero_failures = { "[locking.circuit_breaker]\nfailure_threshold = 0" },
    node_timeout_too_short = { "[locking.cluster]\nheartbeat_interval = \"30s\"\nnode_timeout = \"30s\"" },
    consensus_above_size = { "[locking.cluster]\nconsensus_threshold = 9" },
    redis_without_url = { "[locking]\nbackend = \"redis\"\n[redis]\nurl = \"\"" },
)]
fn inconsistent_values_are_rejected(toml: &str) {
    assert!(matches!(
        EngineConfig::from_toml(toml),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn unknown_backend_is_parse_error() {
    assert!(matches!(
        EngineConfig::from_toml("[locking]\nbackend = \"etcd\""),
        Err(ConfigError::Toml(_))
    ));
}

#[test]
fn load_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[legacy]\nwal_path = \"/tmp/locks.wal\"").unwrap();
    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(
        config.legacy.wal_path.as_deref(),
        Some(Path::new("/tmp/locks.wal"))
    );
}

#[test]
fn load_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::load(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn testing_config_is_valid() {
    EngineConfig::for_testing().validate().unwrap();
}
