//! Contract tests for context isolation around model loading

use std::panic::{catch_unwind, AssertUnwindSafe};

use model_zoo::test_utils::{FakeBackend, FakeContext, FakeError};
use model_zoo::{
    load_architecture, resnet50, vgg16, with_active_context, AppConfig, Architecture, Backend,
    ExecutionContext, LoadError, ScopeError,
};

const NO_EXTRAS: &[&str] = &[];

#[test]
fn test_active_context_restored_after_success() {
    let backend = FakeBackend::new();
    let before = backend.active_context();
    let session = FakeContext::new("caller");

    let loaded = resnet50(&backend, Some(session.clone()), NO_EXTRAS, &AppConfig::default())
        .expect("load should succeed");

    assert!(backend.active_context().same_context(&before));
    assert_eq!(loaded.input.context_id(), session.id());
    assert_eq!(loaded.output.context_id(), session.id());
    assert_eq!(backend.context_writes(), 2);
}

#[test]
fn test_active_context_restored_after_construction_failure() {
    let backend = FakeBackend::new()
        .fail_on(Architecture::VGG16, FakeError::WeightsUnavailable("vgg16".into()));
    let before = backend.active_context();

    let err = vgg16(&backend, Some(FakeContext::new("caller")), NO_EXTRAS, &AppConfig::default())
        .unwrap_err();

    assert!(matches!(err, LoadError::Construction(FakeError::WeightsUnavailable(_))));
    assert!(backend.active_context().same_context(&before));
}

#[test]
fn test_configuration_errors_surface_unmodified() {
    let backend = FakeBackend::new();
    let before = backend.active_context();
    let config = AppConfig::new().with_classes(10);

    let err = load_architecture(&backend, Architecture::DenseNet121, None, NO_EXTRAS, &config)
        .unwrap_err();

    assert!(matches!(err.construction(), Some(FakeError::Rejected(_))));
    assert!(backend.active_context().same_context(&before));
}

#[test]
fn test_active_context_restored_after_panic() {
    let backend = FakeBackend::new().panic_on(Architecture::Xception);
    let before = backend.active_context();

    let result = catch_unwind(AssertUnwindSafe(|| {
        load_architecture(
            &backend,
            Architecture::Xception,
            Some(FakeContext::new("caller")),
            NO_EXTRAS,
            &AppConfig::default(),
        )
    }));

    assert!(result.is_err());
    assert!(backend.active_context().same_context(&before));

    // The loader stays usable after a panicking constructor.
    let loaded = resnet50(&backend, None, NO_EXTRAS, &AppConfig::default());
    assert!(loaded.is_ok());
    assert!(backend.active_context().same_context(&before));
}

#[test]
fn test_fresh_context_when_none_supplied() {
    let backend = FakeBackend::new();
    let before = backend.active_context();

    let loaded = resnet50(&backend, None, NO_EXTRAS, &AppConfig::default()).unwrap();

    assert_ne!(loaded.output.context_id(), before.id());
    assert_eq!(before.tensor_count(), 0);
    assert!(backend.active_context().same_context(&before));
}

#[test]
fn test_context_swapped_by_constructor_is_still_restored() {
    let replacement = FakeContext::new("replacement");
    let backend =
        FakeBackend::new().swap_context_on(Architecture::MobileNet, replacement.clone());
    let before = backend.active_context();

    let loaded = load_architecture(
        &backend,
        Architecture::MobileNet,
        Some(FakeContext::new("caller")),
        &["MobileNet/features:0"],
        &AppConfig::default(),
    )
    .unwrap();

    assert_eq!(loaded.extras[0].context_id(), replacement.id());
    assert!(backend.active_context().same_context(&before));
}

#[test]
fn test_nested_scope_is_rejected() {
    let backend = FakeBackend::new();
    let before = backend.active_context();

    let nested = with_active_context(&backend, FakeContext::new("outer"), |_| {
        resnet50(&backend, None, NO_EXTRAS, &AppConfig::default()).map(|_| ())
    })
    .unwrap();

    assert!(matches!(nested, Err(LoadError::Scope(ScopeError::Reentrant))));
    assert!(backend.active_context().same_context(&before));
}

#[test]
fn test_concurrent_loads_are_serialised() {
    const THREADS: usize = 8;
    const LOADS_PER_THREAD: usize = 100;

    let backend = FakeBackend::new();
    let before = backend.active_context();
    let config = AppConfig::new().with_include_top(false);

    std::thread::scope(|scope| {
        for thread in 0..THREADS {
            let backend = &backend;
            let config = &config;
            scope.spawn(move || {
                for (i, architecture) in Architecture::ALL.iter().cycle().take(LOADS_PER_THREAD).enumerate() {
                    let session = FakeContext::new(format!("thread-{thread}-{i}"));
                    let features = format!("{}/features:0", architecture.name());

                    let loaded =
                        load_architecture(backend, *architecture, Some(session.clone()), &[features], config)
                            .unwrap_or_else(|err| panic!("{architecture}: {err}"));

                    // Another thread's context never leaks into this load.
                    assert_eq!(loaded.input.context_id(), session.id());
                    assert_eq!(loaded.output.context_id(), session.id());
                    assert_eq!(loaded.extras[0].context_id(), session.id());
                }
            });
        }
    });

    assert!(backend.active_context().same_context(&before));
    assert_eq!(backend.constructions(), THREADS * LOADS_PER_THREAD);
    assert_eq!(backend.context_writes(), 2 * THREADS * LOADS_PER_THREAD);
}
