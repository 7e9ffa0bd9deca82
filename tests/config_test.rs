use std::path::PathBuf;

use alarm_bridge::{Config, ConfigError, HttpMethod, TargetName};

fn write_config(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("alarm-bridge-{}-{name}.yaml", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_from_file_expands_env() {
    std::env::set_var("ALARM_BRIDGE_IT_TOKEN", "Bearer xyz");
    let path = write_config(
        "env",
        r#"
targets:
  - name: discord
    url: https://discord.example/api/webhooks/1
    method: post
    headers:
      Authorization: ${ALARM_BRIDGE_IT_TOKEN}
rules:
  - event: rust_smart_alarm_on
    targets: [discord]
"#,
    );

    let cfg = Config::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let target = cfg.target(&TargetName::from("discord")).unwrap();
    assert_eq!(target.method, HttpMethod::Post);
    assert_eq!(target.headers["Authorization"], "Bearer xyz");
    assert!(cfg.rule("rust_smart_alarm_on").is_some());
}

#[test]
fn test_missing_file_is_io_error() {
    let err = Config::load("/definitely/not/here/config.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_unknown_target_in_file_fails() {
    let path = write_config(
        "unknown",
        r#"
targets: []
rules:
  - event: rust_smart_alarm_on
    targets: [nobody]
"#,
    );

    let err = Config::load(&path).unwrap_err();
    std::fs::remove_file(&path).ok();

    assert_eq!(
        err.to_string(),
        "rule 'rust_smart_alarm_on' references unknown target 'nobody'"
    );
}
