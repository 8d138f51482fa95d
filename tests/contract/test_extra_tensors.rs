//! Contract tests for resolving additionally requested tensors

use model_zoo::test_utils::{FakeBackend, FakeContext, FakeModel};
use model_zoo::{densenet169, load, AppConfig, Backend, ExecutionContext, LoadError};

#[test]
fn test_result_length_matches_request() {
    let backend = FakeBackend::new();
    let config = AppConfig::new().with_include_top(false);

    let none = densenet169(&backend, None, &[] as &[&str], &config).unwrap();
    assert_eq!(none.tensor_count(), 2);

    let one = densenet169(&backend, None, &["DenseNet169/features:0"], &config).unwrap();
    assert_eq!(one.tensor_count(), 3);

    let names = vec![
        "DenseNet169/features:0".to_string(),
        "input_1:0".to_string(),
        "DenseNet169/features:0".to_string(),
    ];
    let three = densenet169(&backend, None, &names, &config).unwrap();
    assert_eq!(three.tensor_count(), 5);
    let resolved: Vec<&str> = three.extras.iter().map(|t| t.name()).collect();
    assert_eq!(resolved, names);
}

#[test]
fn test_extras_come_from_the_requested_context() {
    let backend = FakeBackend::new();
    let session = FakeContext::new("caller");

    let loaded = load(
        &backend,
        Some(session.clone()),
        |_| Ok(FakeModel::with_extras(&session, &["block1_conv1/Relu:0", "block2_pool/MaxPool:0"])),
        &AppConfig::default(),
        &["block2_pool/MaxPool:0", "block1_conv1/Relu:0"],
    )
    .unwrap();

    let (input, output, extras) = loaded.into_parts();
    assert_eq!(input.name(), "input_1:0");
    assert_eq!(output.name(), "predictions/Softmax:0");
    assert_eq!(extras[0].name(), "block2_pool/MaxPool:0");
    assert_eq!(extras[1].name(), "block1_conv1/Relu:0");
    assert!(extras.iter().all(|t| t.context_id() == session.id()));
}

#[test]
fn test_unknown_name_fails_whole_call() {
    let backend = FakeBackend::new();
    let before = backend.active_context();

    let err = densenet169(
        &backend,
        None,
        &["DenseNet169/features:0", "no_such_op:0"],
        &AppConfig::default(),
    )
    .unwrap_err();

    assert!(matches!(err, LoadError::TensorNotFound { ref name } if name == "no_such_op:0"));
    assert!(err.is_lookup_failure());
    assert!(backend.active_context().same_context(&before));
}

#[test]
fn test_operation_name_is_not_a_tensor_name() {
    let backend = FakeBackend::new();
    let before = backend.active_context();

    let err = densenet169(&backend, None, &["DenseNet169/features"], &AppConfig::default())
        .unwrap_err();

    assert!(matches!(err, LoadError::InvalidTensorName { .. }));
    assert!(err.to_string().contains("DenseNet169/features"));
    assert!(backend.active_context().same_context(&before));
}
