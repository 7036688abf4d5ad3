use graphbridge::config::*;
use graphbridge::errors::BridgeError;
use tempfile::TempDir;

#[test]
fn test_default_config_binds_loopback() {
    let config = BridgeConfig::default();
    assert_eq!(config.host, DEFAULT_HOST);
    assert_eq!(config.port, DEFAULT_PORT);
    assert!(!config.headless);
    assert_eq!(config.addr(), "127.0.0.1:9999");
}

#[test]
fn test_default_timing_knobs_are_sane() {
    let config = BridgeConfig::default();
    assert_eq!(config.accept_poll().as_millis(), 1000);
    assert_eq!(config.read_timeout().as_secs(), 5);
    assert_eq!(config.executor_timeout().as_secs(), 5);
    assert_eq!(config.probe_timeout().as_secs(), 2);
    assert_eq!(config.reclaim_grace().as_secs(), 1);
}

#[test]
fn test_save_and_load_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bridge.json");
    let mut config = BridgeConfig::default();
    config.port = 12345;
    config.headless = true;
    save_config(&path, &config).unwrap();
    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_falls_back_to_default() {
    let dir = TempDir::new().unwrap();
    let loaded = load_config(&dir.path().join("absent.json")).unwrap();
    assert_eq!(loaded, BridgeConfig::default());
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bridge.json");
    std::fs::write(&path, "{not json").unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, BridgeError::Config { .. }));
}

#[test]
fn test_family_markers_default_to_own_name() {
    let config = BridgeConfig::default();
    assert!(config.family_markers.iter().any(|m| m == "graphbridge"));
}
