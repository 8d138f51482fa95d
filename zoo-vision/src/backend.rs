//! The symbolic backend: Keras-style graphs behind the model-zoo traits

use model_zoo::{AppConfig, Architecture, Backend, ZooSettings};

use crate::error::VisionError;
use crate::models::{build, BuildOptions, SymbolicModel};
use crate::session::{get_session, set_session, Session};

/// Builds architectures into the active [`Session`]'s graph.
#[derive(Debug, Clone, Default)]
pub struct SymbolicBackend {
    options: BuildOptions,
}

impl SymbolicBackend {
    /// Backend reading the weights cache location from the environment
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: ZooSettings) -> Self {
        Self { options: BuildOptions { settings, ..BuildOptions::default() } }
    }

    /// Fail construction when ImageNet weights are not in the cache
    pub fn require_cached_weights(mut self, require: bool) -> Self {
        self.options.require_cached_weights = require;
        self
    }

    pub fn settings(&self) -> &ZooSettings {
        &self.options.settings
    }
}

impl Backend for SymbolicBackend {
    type Context = Session;
    type Model = SymbolicModel;
    type Error = VisionError;

    fn name(&self) -> &'static str {
        "symbolic"
    }

    fn active_context(&self) -> Session {
        get_session()
    }

    fn set_active_context(&self, context: Session) {
        set_session(context);
    }

    fn new_context(&self) -> Session {
        Session::new()
    }

    fn construct(&self, architecture: Architecture, config: &AppConfig) -> Result<SymbolicModel, VisionError> {
        build(architecture, config, &self.options)
    }
}
