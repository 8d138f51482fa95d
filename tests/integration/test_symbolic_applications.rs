//! End-to-end loading through the symbolic backend
//!
//! Every test touches the process-wide session slot and is therefore serial.

use model_zoo::{
    densenet121, load_architecture, mobilenet, resnet50, vgg16, AppConfig, Architecture, Backend,
    InputShape, LoadError, Pooling, Weights, ZooSettings,
};
use serial_test::serial;
use zoo_vision::{get_session, set_session, Session, SymbolicBackend, VisionError};

const NO_EXTRAS: &[&str] = &[];

fn backend() -> SymbolicBackend {
    model_zoo::logging::init();
    SymbolicBackend::with_settings(ZooSettings::with_home("/nonexistent/model-zoo"))
}

/// Install a known session as the active one and return it
fn fresh_global() -> Session {
    let session = Session::new();
    set_session(session.clone());
    session
}

#[test]
#[serial]
fn test_vgg16_random_weights_with_top() {
    let backend = backend();
    let global = fresh_global();
    let ctx = Session::new();
    let config = AppConfig::new().with_weights(Weights::None).with_classes(1000);

    let loaded = vgg16(&backend, Some(ctx.clone()), NO_EXTRAS, &config).unwrap();

    assert_eq!(loaded.tensor_count(), 2);
    assert_eq!(loaded.input.shape(), &[None, Some(224), Some(224), Some(3)]);
    assert_eq!(loaded.output.name(), "predictions/Softmax:0");
    assert_eq!(loaded.output.shape(), &[None, Some(1000)]);
    assert_eq!(loaded.output.graph_id(), ctx.graph().id());
    assert_eq!(get_session(), global);
    assert!(global.graph().is_empty());
}

#[test]
#[serial]
fn test_resnet50_named_activation() {
    let backend = backend();
    let global = fresh_global();
    let ctx = Session::new();

    let loaded =
        resnet50(&backend, Some(ctx.clone()), &["activation_49/Relu:0"], &AppConfig::default())
            .unwrap();

    let (input, output, extras) = loaded.into_parts();
    assert_eq!(input.name(), "input_1:0");
    assert_eq!(output.name(), "fc1000/Softmax:0");
    assert_eq!(extras.len(), 1);
    assert_eq!(extras[0].name(), "activation_49/Relu:0");
    assert_eq!(extras[0].shape(), &[None, Some(7), Some(7), Some(2048)]);
    assert_eq!(get_session(), global);
}

#[test]
#[serial]
fn test_second_model_in_same_context_gets_new_names() {
    let backend = backend();
    fresh_global();
    let ctx = Session::new();
    let config = AppConfig::new().with_include_top(false).with_weights(Weights::None);

    resnet50(&backend, Some(ctx.clone()), &["activation_49/Relu:0"], &config).unwrap();
    let second =
        resnet50(&backend, Some(ctx.clone()), &["activation_98/Relu:0"], &config).unwrap();

    assert_eq!(second.input.name(), "input_2:0");
    assert_eq!(second.extras[0].name(), "activation_98/Relu:0");
    assert_eq!(second.output, second.extras[0]);
}

#[test]
#[serial]
fn test_mobilenet_unknown_tensor() {
    let backend = backend();
    let global = fresh_global();

    let err = mobilenet(&backend, Some(Session::new()), &["nonexistent:0"], &AppConfig::default())
        .unwrap_err();

    assert!(matches!(err, LoadError::TensorNotFound { ref name } if name == "nonexistent:0"));
    assert_eq!(get_session(), global);
}

#[test]
#[serial]
fn test_densenet121_conflicting_options() {
    let backend = backend();
    let global = fresh_global();
    let ctx = Session::new();
    let config = AppConfig::new().with_classes(10).with_weights(Weights::ImageNet);

    let err = densenet121(&backend, Some(ctx.clone()), NO_EXTRAS, &config).unwrap_err();

    match err {
        LoadError::Construction(err @ VisionError::InvalidConfiguration { .. }) => {
            assert!(err.to_string().contains("classes"));
        }
        other => panic!("expected a configuration error, got {other}"),
    }
    assert!(ctx.graph().is_empty());
    assert_eq!(get_session(), global);
}

#[test]
#[serial]
fn test_every_architecture_headless() {
    let backend = backend();
    let global = fresh_global();
    let config = AppConfig::new().with_include_top(false).with_weights(Weights::None);

    for architecture in Architecture::ALL {
        let ctx = backend.new_context();
        let loaded = load_architecture(&backend, architecture, Some(ctx.clone()), NO_EXTRAS, &config)
            .unwrap_or_else(|err| panic!("{architecture}: {err}"));

        assert_eq!(loaded.tensor_count(), 2, "{architecture}");
        assert_eq!(loaded.input.name(), "input_1:0", "{architecture}");
        assert_eq!(
            loaded.output.channels(),
            Some(architecture.spec().feature_channels),
            "{architecture}"
        );
        assert_eq!(loaded.output.graph_id(), ctx.graph().id());
        assert_eq!(get_session(), global, "{architecture}");
    }
    assert!(global.graph().is_empty());
}

#[test]
#[serial]
fn test_extras_from_intermediate_layers() {
    let backend = backend();
    fresh_global();
    let config = AppConfig::new()
        .with_include_top(false)
        .with_weights(Weights::None)
        .with_input_shape(InputShape::square(299))
        .with_pooling(Pooling::Avg);

    let loaded = load_architecture(
        &backend,
        Architecture::InceptionV3,
        None,
        &["mixed10/concat:0", "mixed7/concat:0", "mixed0/concat:0"],
        &config,
    )
    .unwrap();

    let shapes: Vec<_> = loaded.extras.iter().map(|t| t.shape().to_vec()).collect();
    assert_eq!(shapes[0], vec![None, Some(8), Some(8), Some(2048)]);
    assert_eq!(shapes[1], vec![None, Some(17), Some(17), Some(768)]);
    assert_eq!(shapes[2], vec![None, Some(35), Some(35), Some(256)]);
    assert_eq!(loaded.output.shape(), &[None, Some(2048)]);
}

#[test]
#[serial]
fn test_operation_name_rejected() {
    let backend = backend();
    let global = fresh_global();
    let config = AppConfig::new().with_include_top(false).with_weights(Weights::None);

    let err = vgg16(&backend, None, &["block1_conv1/Relu"], &config).unwrap_err();

    assert!(matches!(err, LoadError::InvalidTensorName { .. }));
    assert_eq!(get_session(), global);
}

#[test]
#[serial]
fn test_oversized_input_is_a_shape_error() {
    let backend = backend();
    let global = fresh_global();
    let config = AppConfig::new()
        .with_weights(Weights::None)
        .with_input_shape(InputShape::new(1 << 40, 1 << 40, 3));

    let err = vgg16(&backend, Some(Session::new()), NO_EXTRAS, &config).unwrap_err();

    match err {
        LoadError::Construction(VisionError::InvalidShape { ref layer, .. }) => assert_eq!(layer, "flatten"),
        other => panic!("expected a shape error, got {other}"),
    }
    assert_eq!(get_session(), global);
}
