//! 配置模块单元测试

use std::collections::HashMap;

use super::*;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |var| vars.get(var).cloned()
}

#[test]
fn test_defaults() {
    let config = RuntimeConfig::default();
    assert!(config.check_wellformedness);
    assert_eq!(config.log_level, LogLevel::Info);
    assert_eq!(config.scheduler, SchedulerConfig::default());
}

#[test]
fn test_empty_ron_takes_defaults() {
    let config = RuntimeConfig::from_ron_str("()").unwrap();
    assert_eq!(config, RuntimeConfig::default());
}

#[test]
fn test_partial_ron() {
    let config = RuntimeConfig::from_ron_str(
        r#"(
            scheduler: (num_workers: 3, stack_size: Some(1048576)),
            log_level: debug,
            check_wellformedness: false,
        )"#,
    )
    .unwrap();

    assert_eq!(config.scheduler.num_workers, 3);
    assert_eq!(config.scheduler.stack_size, Some(1 << 20));
    assert_eq!(config.scheduler.idle_timeout_ms, 1);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert!(!config.check_wellformedness);
}

#[test]
fn test_parse_error() {
    let err = RuntimeConfig::from_ron_str("(scheduler: 12)").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("permflow.ron");

    let mut config = RuntimeConfig::default();
    config.scheduler.num_workers = 7;
    config.log_level = LogLevel::Trace;
    config.save(&path).unwrap();

    assert_eq!(RuntimeConfig::load(&path).unwrap(), config);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = RuntimeConfig::load(dir.path().join("absent.ron")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.ron"));
}

#[test]
fn test_overrides() {
    let config = RuntimeConfig::default()
        .with_overrides(lookup(&[
            (ENV_WORKERS, "5"),
            (ENV_LOG, "WARN"),
            (ENV_CHECK_WELLFORMEDNESS, "off"),
        ]))
        .unwrap();

    assert_eq!(config.scheduler.num_workers, 5);
    assert_eq!(config.log_level, LogLevel::Warn);
    assert!(!config.check_wellformedness);
}

#[test]
fn test_no_overrides_keeps_config() {
    let config = RuntimeConfig::default().with_overrides(lookup(&[])).unwrap();
    assert_eq!(config, RuntimeConfig::default());
}

#[test]
fn test_invalid_override() {
    let err = RuntimeConfig::default()
        .with_overrides(lookup(&[(ENV_WORKERS, "many")]))
        .unwrap_err();

    match err {
        ConfigError::InvalidValue { var, value } => {
            assert_eq!(var, ENV_WORKERS);
            assert_eq!(value, "many");
        },
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_log_level_from_str() {
    assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
    assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    assert!("loud".parse::<LogLevel>().is_err());
}
