use axum_rag_chat::config::AppConfig;
use axum_rag_chat::rate_limit::WindowKind;
use serial_test::serial;
use std::env;
use std::fs;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("CHAT_SERVER__PORT");
        env::remove_var("CHAT_RATE_LIMIT__ENABLED");
        env::remove_var("CHAT_RATE_LIMIT__MAX_COUNT");
        env::remove_var("CONFIG_FILE");
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args(["axum-rag-chat"]).expect("defaults should load");

    assert_eq!(config.server.port, 3000);
    assert!(!config.rate_limit.enabled);
    assert_eq!(config.rate_limit.max_count, 10);
    assert_eq!(config.rate_limit.window, WindowKind::Minute);
    assert!(config.uploads.enabled);
    assert_eq!(config.uploads.ttl_secs, 3600);
    assert_eq!(config.persistence.provider, "memory");
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("CHAT_SERVER__PORT", "9090");
        env::set_var("CHAT_RATE_LIMIT__ENABLED", "true");
        env::set_var("CHAT_RATE_LIMIT__MAX_COUNT", "3");
    }

    let config = AppConfig::load_from_args(["axum-rag-chat"]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert!(config.rate_limit.enabled);
    assert_eq!(config.rate_limit.max_count, 3);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_flag_overrides_env() {
    clear_env_vars();
    unsafe {
        env::set_var("CHAT_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args(["axum-rag-chat", "--port", "7171"])
        .expect("Failed to load config");
    assert_eq!(config.server.port, 7171);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let config_content = r#"
server:
  port: 7070
rate_limit:
  window: hour
    "#;

    let file_path = "test_config.yaml";
    fs::write(file_path, config_content).expect("Failed to write temp config");

    let config = AppConfig::load_from_args(["axum-rag-chat", "--config", file_path])
        .expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.rate_limit.window, WindowKind::Hour);

    fs::remove_file(file_path).unwrap();
    clear_env_vars();
}
