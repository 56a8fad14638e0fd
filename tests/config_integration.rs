use chat_guard::config::{AppConfig, ConfigError, StoreProvider};
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;

const SECRET_VAR: &str = "CHAT_GUARD_SECURITY__JWT_SECRET";

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        for var in [
            SECRET_VAR,
            "CHAT_GUARD_SECURITY__JWT_AUDIENCE",
            "CHAT_GUARD_SERVER__PORT",
            "CHAT_GUARD_SERVER__CORS_ORIGINS",
            "CHAT_GUARD_STORE__PROVIDER",
            "CONFIG_FILE",
            "HOST",
            "PORT",
            "JWT_SECRET",
            "ADMISSION_ENABLED",
            "MAX_CONCURRENT_REQUESTS",
            "TIMEOUT_DISABLED",
            "STORE_PROVIDER",
        ] {
            env::remove_var(var);
        }
    }
}

fn with_secret() {
    unsafe {
        env::set_var(SECRET_VAR, "test-secret");
    }
}

fn load() -> Result<AppConfig, ConfigError> {
    AppConfig::load_from_args(["chat-guard"])
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();
    with_secret();

    let config = load().expect("defaults with a secret should load");
    assert_eq!(config.server.port, 5000);
    assert_eq!(config.server.cors_origins.len(), 4);
    assert!(config.admission.enabled);
    assert_eq!(config.admission.max_in_flight_per_origin, 100);
    assert_eq!(config.single_flight.idle_timeout_secs, 1800);
    assert_eq!(config.store.provider, StoreProvider::Memory);

    clear_env_vars();
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    with_secret();
    unsafe {
        env::set_var("CHAT_GUARD_SERVER__PORT", "9090");
        env::set_var(
            "CHAT_GUARD_SERVER__CORS_ORIGINS",
            "https://a.example,https://b.example",
        );
    }

    let config = load().expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(
        config.server.cors_origins,
        vec!["https://a.example", "https://b.example"]
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_jwt_audience() {
    clear_env_vars();
    with_secret();

    let config = load().expect("Failed to load config");
    assert_eq!(config.security.audience(), None);

    unsafe {
        env::set_var("CHAT_GUARD_SECURITY__JWT_AUDIENCE", "authenticated");
    }
    let config = load().expect("Failed to load config");
    assert_eq!(config.security.audience(), Some("authenticated"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_wins_over_env() {
    clear_env_vars();
    with_secret();
    unsafe {
        env::set_var("CHAT_GUARD_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args(["chat-guard", "--port", "7171"])
        .expect("Failed to load config");
    assert_eq!(config.server.port, 7171);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    write!(
        file,
        r#"
server:
  port: 7070
security:
  jwt_secret: from-file
single_flight:
  idle_timeout_secs: 60
"#
    )
    .expect("Failed to write temp config");

    unsafe {
        env::set_var("CONFIG_FILE", file.path());
    }

    let config = load().expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.security.jwt_secret, "from-file");
    assert_eq!(config.single_flight.idle_timeout_secs, 60);
    // Untouched sections keep their defaults.
    assert_eq!(config.cache.ttl_secs, 300);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_secret_is_rejected() {
    clear_env_vars();

    let err = load().expect_err("an empty secret must not load");
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("jwt_secret")));
}

#[test]
#[serial]
fn test_zero_ceiling_is_rejected() {
    clear_env_vars();
    with_secret();
    unsafe {
        env::set_var("MAX_CONCURRENT_REQUESTS", "0");
    }

    let err = load().expect_err("a zero ceiling must not load");
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("max_in_flight")));

    clear_env_vars();
}

#[test]
#[serial]
fn test_rest_store_requires_url() {
    clear_env_vars();
    with_secret();
    unsafe {
        env::set_var("STORE_PROVIDER", "rest");
    }

    let err = load().expect_err("rest without a url must not load");
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("store.url")));

    clear_env_vars();
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();
    with_secret();

    let cwd_path = "config.yaml";
    fs::write(cwd_path, "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");

    let result = std::panic::catch_unwind(|| {
        let config = load().expect("Failed to load config");
        assert_eq!(config.server.port, 6060);
    });

    fs::remove_file(cwd_path).unwrap();
    clear_env_vars();

    if let Err(e) = result {
        std::panic::resume_unwind(e);
    }
}
