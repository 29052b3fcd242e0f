//! Config layering through files, environment and command-line overrides

use autograder::config::{options, Config, ConfigError};
use serial_test::serial;
use std::fs;

fn write_config(base: &std::path::Path, name: &str, body: &str) {
    let dir = base.join("autograder").join("config");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), body).unwrap();
}

#[test]
#[serial]
fn test_files_then_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let base = format!("dirs.base={}", dir.path().display());
    write_config(
        dir.path(),
        "config.json",
        r#"{"web.http.port": 9000, "log.text.level": "warn"}"#,
    );
    write_config(dir.path(), "secrets.json", r#"{"email.from": "grader@example.com"}"#);

    let config = Config::load(&[base, "web.http.port=9100".to_string()]).unwrap();

    assert_eq!(options::WEB_HTTP_PORT.get(&config), 9100);
    assert_eq!(options::LOG_TEXT_LEVEL.get(&config), "warn");
    assert_eq!(options::EMAIL_FROM.get(&config), "grader@example.com");
}

#[test]
#[serial]
fn test_env_beats_files() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "config.json", r#"{"tasks.minrest": 60}"#);

    std::env::set_var("AUTOGRADER__TASKS__MINREST", "5");
    let result = Config::load(&[format!("dirs.base={}", dir.path().display())]);
    std::env::remove_var("AUTOGRADER__TASKS__MINREST");

    let config = result.unwrap();
    assert_eq!(options::TASK_MIN_REST_SECS.get(&config), 5);
}

#[test]
#[serial]
fn test_base_dir_in_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "config.json", r#"{"dirs.base": "/elsewhere"}"#);

    let result = Config::load(&[format!("dirs.base={}", dir.path().display())]);
    assert!(matches!(result, Err(ConfigError::BaseDirInFile { .. })));
}

#[test]
fn test_bad_override() {
    assert!(matches!(
        Config::load(&["no-equals-sign".to_string()]),
        Err(ConfigError::BadOverride(_))
    ));
}

#[test]
fn test_every_option_is_described() {
    let described = options::describe_all();
    for key in [
        options::NAME.key,
        options::BASE_DIR.key,
        options::WEB_HTTP_PORT.key,
        options::NO_TASKS.key,
        options::TASK_MIN_REST_SECS.key,
        options::SERVER_STACK_SIZE.key,
    ] {
        assert!(described.iter().any(|(k, _)| *k == key), "missing {key}");
    }
}
