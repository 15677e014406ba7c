use std::{env, fs};

use dynsql_server::AppConfig;
use dynsql_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("dynsql.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 2048

[storage.postgres]
host = "db"
port = 5433
user = "reporting"
password = "secret"
database = "shop"
pool_size = 4
statement_timeout_ms = 5000

[templates]
path = "templates.json"

[cache]
enabled = false

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.server.body_limit_bytes, 2048);
    assert!(!cfg.cache.enabled);
    assert_eq!(cfg.templates.path.as_deref(), Some("templates.json"));
    assert_eq!(cfg.logging.level, "debug");
    let pg = cfg.storage.postgres.as_ref().expect("postgres config");
    assert_eq!(pg.pool_size, 4);
    assert_eq!(pg.statement_timeout_ms, Some(5000));
    assert_eq!(pg.idle_timeout_ms, Some(300_000));
    assert_eq!(
        pg.connection_url(),
        "postgres://reporting:secret@db:5433/shop"
    );

    // 2) Env override should win over file
    unsafe {
        env::set_var("DYNSQL__SERVER__PORT", "9090");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9090);
    unsafe {
        env::remove_var("DYNSQL__SERVER__PORT");
    }

    // 3) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[storage.postgres]
host = "db"
pool_size = 0
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("pool_size must be > 0"));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = load_config(path.to_str()).expect("defaults should load");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert!(cfg.cache.enabled);
    assert_eq!(cfg.templates.path, None);
    assert_eq!(
        cfg.storage.postgres.as_ref().map(|pg| pg.database.as_str()),
        Some("dynsql")
    );
}

#[test]
fn default_config_serializes_to_loadable_toml() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("roundtrip.toml");

    let rendered = toml::to_string(&AppConfig::default()).expect("serialize config");
    fs::write(&path, rendered).expect("write toml");

    let cfg = load_config(path.to_str()).expect("should parse serialized defaults");
    assert_eq!(cfg.server.body_limit_bytes, 1024 * 1024);
    assert_eq!(cfg.logging.level, "info");
    assert_eq!(
        cfg.storage.postgres.as_ref().and_then(|pg| pg.idle_timeout_ms),
        Some(300_000)
    );
}
