//! Contract tests for configuration bundles and process settings

use std::path::PathBuf;

use model_zoo::config::MODEL_ZOO_HOME_ENV;
use model_zoo::test_utils::FakeBackend;
use model_zoo::{
    logging, mobilenet, AppConfig, ConfigError, InputShape, Pooling, Weights, ZooSettings,
};
use serial_test::serial;

#[test]
fn test_bundle_from_json() {
    let config = AppConfig::from_json_str(
        r#"{"include_top": false, "weights": null, "input_shape": [160, 160, 3],
            "pooling": "avg", "alpha": 0.5, "depth_multiplier": 1}"#,
    )
    .unwrap();

    assert!(!config.include_top);
    assert_eq!(config.weights, Weights::None);
    assert_eq!(config.input_shape, Some(InputShape::square(160)));
    assert_eq!(config.pooling, Some(Pooling::Avg));
    assert_eq!(config.extra.len(), 2);
    assert_eq!(config.option("alpha").and_then(|v| v.as_f64()), Some(0.5));
}

#[test]
fn test_bundle_survives_json_round_trip() {
    let config = AppConfig::new()
        .with_include_top(false)
        .with_weights(Weights::Path(PathBuf::from("/models/custom.h5")))
        .with_input_shape(InputShape::new(240, 320, 3))
        .with_pooling(Pooling::Max)
        .with_option("alpha", 0.75);

    let json = config.to_json().unwrap();
    assert_eq!(AppConfig::from_json_str(&json).unwrap(), config);
}

#[test]
fn test_malformed_json_is_reported() {
    let err = AppConfig::from_json_str(r#"{"include_top": "yes"}"#).unwrap_err();
    assert!(matches!(err, ConfigError::Json(_)));

    let err = AppConfig::from_json_file("/nonexistent/bundle.json").unwrap_err();
    assert!(matches!(err, ConfigError::Io { ref path, .. } if path == &PathBuf::from("/nonexistent/bundle.json")));
}

#[test]
fn test_bundle_from_file() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!("model-zoo-bundle-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"classes": 10, "weights": null}"#)?;

    let config = AppConfig::from_json_file(&path)?;
    std::fs::remove_file(&path)?;

    assert_eq!(config.classes, 10);
    assert!(config.include_top);
    Ok(())
}

#[test]
fn test_bundle_is_forwarded_verbatim() {
    logging::init();
    let backend = FakeBackend::new();
    // The fake constructor rejects ImageNet classifiers with other class
    // counts, so reaching it with `classes: 10` proves nothing was rewritten.
    let config = AppConfig::new().with_classes(10).with_option("alpha", 4.0);

    let err = mobilenet(&backend, None, &[] as &[&str], &config).unwrap_err();
    assert!(err.construction().is_some());
    assert_eq!(backend.constructions(), 1);
}

#[test]
#[serial]
fn test_settings_home_from_env() {
    std::env::set_var(MODEL_ZOO_HOME_ENV, "/srv/model-zoo");
    let settings = ZooSettings::from_env();
    std::env::remove_var(MODEL_ZOO_HOME_ENV);

    assert_eq!(settings.home, PathBuf::from("/srv/model-zoo"));
    assert_eq!(settings.weights_dir(), PathBuf::from("/srv/model-zoo/weights"));
}

#[test]
#[serial]
fn test_settings_default_when_env_unset() {
    std::env::remove_var(MODEL_ZOO_HOME_ENV);
    let settings = ZooSettings::from_env();
    assert!(settings.home.ends_with("model-zoo") || settings.home.ends_with(".model-zoo"));
}
