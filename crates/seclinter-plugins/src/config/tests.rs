//! Unit tests for manager configuration.

use std::fs;

use rstest::rstest;
use serde_json::json;
use tempfile::TempDir;

use super::*;

#[test]
fn empty_object_yields_defaults() {
    let config: ManagerConfig = serde_json::from_str("{}").expect("valid config");

    assert_eq!(config, ManagerConfig::default());
    assert_eq!(config.plugins_dir, PathBuf::from("plugins"));
    assert_eq!(config.call_timeout(), Duration::from_secs(10));
    assert_eq!(config.error_threshold, 3);
    assert_eq!(config.memory_limit_mb, 100);
    assert_eq!(config.allowed_modules, ["path", "crypto"]);
    assert!(config.default_permissions.contains(PluginPermission::FsRead));
    assert!(config.default_permissions.contains(PluginPermission::NetOutbound));
    assert_eq!(config.default_permissions.len(), 2);
}

#[rstest]
#[case(json!(true), true, json!({}))]
#[case(json!(false), false, json!({}))]
#[case(json!({"enabled": false, "level": "high"}), false, json!({"level": "high"}))]
#[case(json!({"maxFiles": 10}), true, json!({"maxFiles": 10}))]
fn plugin_settings_accept_bool_or_object(
    #[case] raw: Value,
    #[case] enabled: bool,
    #[case] options: Value,
) {
    let setting: PluginSetting = serde_json::from_value(raw).expect("valid setting");

    assert_eq!(setting.is_enabled(), enabled);
    let config = setting.to_config();
    assert_eq!(config.enabled, enabled);
    assert_eq!(config.options_value(), options);
}

#[test]
fn unknown_plugins_default_to_enabled() {
    let config = ManagerConfig::default();
    assert_eq!(config.plugin_config("anything"), PluginConfig::default());
}

#[test]
fn from_path_reads_camel_case_json() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("seclinter.json");
    fs::write(
        &path,
        r#"{
            "autoDiscover": false,
            "pluginsDir": "vendor/plugins",
            "enableSandbox": false,
            "defaultPermissions": ["fs:read"],
            "errorThreshold": 5,
            "fsRoot": "/srv/project",
            "minRequestIntervalMs": 250,
            "plugins": {"seclinter-plugin-xss": {"enabled": true, "strict": true}}
        }"#,
    )
    .expect("write config");

    let config = ManagerConfig::from_path(&path).expect("valid config");

    assert!(!config.auto_discover);
    assert!(!config.enable_sandbox);
    assert_eq!(config.plugins_dir, PathBuf::from("vendor/plugins"));
    assert_eq!(config.error_threshold, 5);
    assert_eq!(config.fs_root, Some(Utf8PathBuf::from("/srv/project")));
    assert_eq!(config.min_request_interval(), Duration::from_millis(250));
    assert_eq!(
        config.plugin_config("seclinter-plugin-xss").options_value(),
        json!({"strict": true})
    );
}

#[rstest]
#[case::missing(None)]
#[case::malformed(Some("{ not json"))]
#[case::bad_permission(Some(r#"{"defaultPermissions": ["root:all"]}"#))]
fn from_path_reports_config_errors(#[case] contents: Option<&str>) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("seclinter.json");
    if let Some(raw) = contents {
        fs::write(&path, raw).expect("write config");
    }

    let error = ManagerConfig::from_path(&path).expect_err("invalid config");

    assert!(matches!(error, PluginError::Config { .. }));
}
