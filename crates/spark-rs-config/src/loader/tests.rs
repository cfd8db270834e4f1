//! Tests for layered configuration loading.

use super::*;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write JSON5 contents to a path, creating parent directories if needed.
fn write_json5(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("dir");
    }
    fs::write(path, contents).expect("write");
}

/// Options that never touch the real system or user layers.
fn isolated_options(cwd: &Path) -> LayeredConfigOptions {
    LayeredConfigOptions {
        cwd: cwd.to_path_buf(),
        system_config_path: None,
        user_config_path: None,
        runtime_paths: Vec::new(),
        project_root_markers: vec![".git".to_string()],
    }
}

#[test]
fn parse_minimal_config() {
    let config = SparkConfig::load_from_str("{}").expect("config");
    assert_eq!(config.batch.size, 7);
    assert_eq!(config.batch.max_attempts_per_slot, 3);
    assert_eq!(config.similarity.threshold, 0.85);
    assert_eq!(config.lock.stale_after_secs, 300);
    assert_eq!(config.provider.embedding_dimensions, 1536);
    assert_eq!(config.topics.exploration_rate, 0.2);
    assert!(config.topics.vocabulary.contains(&"Science".to_string()));
}

#[test]
fn parses_json5_comments_and_trailing_commas() {
    let json5 = r#"{
        // smaller batches for testing
        batch: { size: 3, },
        similarity: { threshold: 0.9 },
    }"#;
    let config = SparkConfig::load_from_str(json5).expect("config");
    assert_eq!(config.batch.size, 3);
    assert_eq!(config.similarity.threshold, 0.9);
}

#[test]
fn rejects_unknown_top_level_key() {
    let err = SparkConfig::load_from_str(r#"{ unexpected: true }"#).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("unknown key"));
}

#[test]
fn rejects_unknown_nested_key_with_path() {
    let err = SparkConfig::load_from_str(r#"{ batch: { sise: 3 } }"#).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("batch.sise"), "{msg}");
}

#[test]
fn rejects_wrong_value_type() {
    let err = SparkConfig::load_from_str(r#"{ lock: { stale_after_secs: "5m" } }"#).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("lock.stale_after_secs"), "{msg}");
}

#[test]
fn rejects_out_of_range_threshold() {
    let err = SparkConfig::load_from_str(r#"{ similarity: { threshold: 1.5 } }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn rejects_zero_batch_size() {
    let err = SparkConfig::load_from_str(r#"{ batch: { size: 0 } }"#).unwrap_err();
    assert!(format!("{err}").contains("batch.size"));
}

#[test]
fn rejects_empty_vocabulary() {
    let err = SparkConfig::load_from_str(r#"{ topics: { vocabulary: [] } }"#).unwrap_err();
    assert!(format!("{err}").contains("vocabulary"));
}

#[test]
fn layered_config_applies_precedence() {
    let temp = TempDir::new().expect("tmp");
    let root = temp.path();
    let project_root = root.join("project");
    fs::create_dir_all(project_root.join(".git")).expect("git");
    let cwd = project_root.join("subdir");
    fs::create_dir_all(&cwd).expect("cwd");

    let system_config = root.join("system.json5");
    write_json5(
        &system_config,
        "{ batch: { size: 3, max_attempts_per_slot: 5 }, lock: { stale_after_secs: 60 } }",
    );
    let user_config = root.join("user.json5");
    write_json5(&user_config, "{ batch: { size: 4 } }");
    write_json5(
        &project_root.join(DEFAULT_CONFIG_FILE),
        "{ batch: { size: 5 } }",
    );
    let runtime_config = root.join("runtime.json5");
    write_json5(&runtime_config, "{ similarity: { threshold: 0.8 } }");

    let options = LayeredConfigOptions {
        system_config_path: Some(system_config),
        user_config_path: Some(user_config),
        ..isolated_options(&cwd)
    }
    .with_runtime_path(&runtime_config);
    let layered = SparkConfig::load_layered_with_options(options).expect("layered");

    assert_eq!(layered.layers.len(), 4);
    assert_eq!(layered.layers[2].source, ConfigLayerSource::Project);
    assert_eq!(layered.config.batch.size, 5);
    assert_eq!(layered.config.batch.max_attempts_per_slot, 5);
    assert_eq!(layered.config.lock.stale_after_secs, 60);
    assert_eq!(layered.config.similarity.threshold, 0.8);
}

#[test]
fn layered_config_replaces_arrays() {
    let temp = TempDir::new().expect("tmp");
    let base = temp.path().join("base.json5");
    write_json5(&base, r#"{ topics: { vocabulary: ["Science", "History", "Art"] } }"#);
    let overlay = temp.path().join("overlay.json5");
    write_json5(&overlay, r#"{ topics: { vocabulary: ["Music"] } }"#);

    let options = LayeredConfigOptions {
        user_config_path: Some(base),
        ..isolated_options(temp.path())
    }
    .with_runtime_path(&overlay);
    let layered = SparkConfig::load_layered_with_options(options).expect("layered");
    assert_eq!(layered.config.topics.vocabulary, vec!["Music".to_string()]);
}

#[test]
fn missing_optional_layers_are_skipped() {
    let temp = TempDir::new().expect("tmp");
    let options = LayeredConfigOptions {
        system_config_path: Some(temp.path().join("missing-system.json5")),
        user_config_path: Some(temp.path().join("missing-user.json5")),
        ..isolated_options(temp.path())
    };
    let layered = SparkConfig::load_layered_with_options(options).expect("layered");
    assert!(layered.layers.is_empty());
    assert_eq!(layered.config.batch.size, 7);
}

#[test]
fn missing_runtime_layer_is_an_error() {
    let temp = TempDir::new().expect("tmp");
    let options =
        isolated_options(temp.path()).with_runtime_path(temp.path().join("missing.json5"));
    let err = SparkConfig::load_layered_with_options(options).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFailed(_)));
}

#[test]
fn invalid_layer_reports_layer_label() {
    let temp = TempDir::new().expect("tmp");
    let user_config = temp.path().join("user.json5");
    write_json5(&user_config, "{ store: { path: 42 } }");
    let options = LayeredConfigOptions {
        user_config_path: Some(user_config),
        ..isolated_options(temp.path())
    };
    let err = SparkConfig::load_layered_with_options(options).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("user("), "{msg}");
    assert!(msg.contains("store.path"), "{msg}");
}
