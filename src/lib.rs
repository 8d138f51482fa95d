//! model-zoo: context-scoped loading of pre-trained image classifiers
//!
//! Every supported architecture (DenseNet, Inception, MobileNet, NASNet,
//! ResNet50, VGG and Xception) gets one convenience function returning the
//! model's input tensor, output tensor and any extra tensors requested by
//! name. Construction runs against a caller-supplied execution context; the
//! process-wide active context is restored afterwards on every exit path.
//!
//! The numeric library that actually builds the networks is injected through
//! the [`Backend`] trait. The `zoo-vision` workspace crate provides a
//! symbolic backend and, behind its `tch` feature, a libtorch one.
//!
//! ```no_run
//! use model_zoo::{resnet50, AppConfig};
//! # fn demo<B: model_zoo::Backend>(backend: &B) -> Result<(), model_zoo::LoadError<B::Error>> {
//! let loaded = resnet50(backend, None, &["activation_49/Relu:0"], &AppConfig::default())?;
//! let (input, output, extras) = loaded.into_parts();
//! # let _ = (input, output, extras);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod loader;
pub mod logging;
pub mod registry;
pub mod test_utils;

pub use backend::{Backend, ExecutionContext, LookupError, Model, TensorOf};
pub use config::{AppConfig, InputShape, Pooling, Weights, ZooSettings};
pub use context::{with_active_context, ActiveContextGuard};
pub use error::{ConfigError, LoadError, ScopeError};
pub use loader::{load, LoadResult, Loaded};
pub use registry::{
    densenet121, densenet169, densenet201, inception_resnet_v2, inception_v3, load_architecture,
    mobilenet, mobilenet_v2, nasnet_large, nasnet_mobile, resnet50, vgg16, vgg19, xception,
    Architecture, ArchitectureSpec,
};
