//! zoo-vision: vision backends for model-zoo
//!
//! This crate provides the pre-trained model libraries the model-zoo loader
//! builds architectures with:
//!
//! * [`SymbolicBackend`]: Keras-style symbolic graphs with TF tensor naming
//!   (`block1_conv1/Relu:0`) and a process-wide session slot. No numerics;
//!   shapes, names and configuration validation only.
//! * `TchBackend` (feature `tch`): ResNet50 and VGG on libtorch var stores.

pub mod backend;
pub mod builder;
pub mod error;
pub mod graph;
pub mod models;
pub mod session;
pub mod validation;
pub mod weights;

#[cfg(feature = "tch")]
pub mod tch_backend;

pub use backend::SymbolicBackend;
pub use error::VisionError;
pub use graph::{Graph, SymbolicTensor};
pub use models::SymbolicModel;
pub use session::{clear_session, get_session, set_session, Session};
pub use weights::WeightSource;

#[cfg(feature = "tch")]
pub use tch_backend::{TchBackend, TchContext, TchModel};
