//! Contract tests for the architecture registry and its entry points

use std::collections::BTreeSet;

use model_zoo::test_utils::{FakeBackend, FakeContext};
use model_zoo::{
    densenet121, densenet169, densenet201, inception_resnet_v2, inception_v3, load_architecture,
    mobilenet, mobilenet_v2, nasnet_large, nasnet_mobile, resnet50, vgg16, vgg19, xception,
    AppConfig, Architecture, Backend, ConfigError, ExecutionContext, LoadResult,
};

type EntryPoint =
    fn(&FakeBackend, Option<FakeContext>, &[String], &AppConfig) -> LoadResult<FakeBackend>;

fn entry_points() -> [(Architecture, EntryPoint); 13] {
    [
        (Architecture::DenseNet121, densenet121),
        (Architecture::DenseNet169, densenet169),
        (Architecture::DenseNet201, densenet201),
        (Architecture::InceptionResNetV2, inception_resnet_v2),
        (Architecture::InceptionV3, inception_v3),
        (Architecture::MobileNet, mobilenet),
        (Architecture::MobileNetV2, mobilenet_v2),
        (Architecture::NASNetLarge, nasnet_large),
        (Architecture::NASNetMobile, nasnet_mobile),
        (Architecture::ResNet50, resnet50),
        (Architecture::VGG16, vgg16),
        (Architecture::VGG19, vgg19),
        (Architecture::Xception, xception),
    ]
}

#[test]
fn test_every_entry_point_is_context_scoped() {
    let backend = FakeBackend::new();
    let before = backend.active_context();
    let config = AppConfig::new().with_include_top(false);

    for (architecture, entry) in entry_points() {
        let session = FakeContext::new(architecture.name());
        let features = format!("{}/features:0", architecture.name());

        let loaded = entry(&backend, Some(session.clone()), &[features.clone()], &config)
            .unwrap_or_else(|err| panic!("{architecture}: {err}"));

        assert_eq!(loaded.tensor_count(), 3, "{architecture}");
        assert_eq!(loaded.output.name(), features);
        assert_eq!(loaded.extras[0].context_id(), session.id());
        assert!(backend.active_context().same_context(&before), "{architecture}");
    }

    assert_eq!(backend.constructions(), 13);
}

#[test]
fn test_entry_points_match_parameterised_form() {
    for (architecture, entry) in entry_points() {
        let by_entry = FakeBackend::new();
        let by_name = FakeBackend::new();

        let a = entry(&by_entry, None, &[], &AppConfig::default()).unwrap();
        let b = load_architecture(&by_name, architecture, None, &[] as &[&str], &AppConfig::default())
            .unwrap();

        assert_eq!(a.input.name(), b.input.name());
        assert_eq!(a.output.name(), b.output.name());
    }
}

#[test]
fn test_all_lists_every_architecture_once() {
    let names: BTreeSet<&str> = Architecture::ALL.iter().map(|a| a.name()).collect();
    assert_eq!(names.len(), 13);
    assert_eq!(Architecture::ALL.iter().filter(|a| a.spec().default_size == 299).count(), 3);
}

#[test]
fn test_architecture_names_round_trip() {
    for architecture in Architecture::ALL {
        let parsed: Architecture = architecture.to_string().parse().unwrap();
        assert_eq!(parsed, architecture);
    }
    assert_eq!("inception-resnet-v2".parse::<Architecture>().unwrap(), Architecture::InceptionResNetV2);
    assert!(matches!(
        "alexnet".parse::<Architecture>(),
        Err(ConfigError::UnknownArchitecture(name)) if name == "alexnet"
    ));
}
