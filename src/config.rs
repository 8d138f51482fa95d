//! Configuration bundles forwarded to architecture constructors, and
//! process-wide settings read from the environment.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Environment variable overriding the weights cache root
pub const MODEL_ZOO_HOME_ENV: &str = "MODEL_ZOO_HOME";

/// Which weights an architecture is initialised with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Weights {
    /// Pre-trained ImageNet weights
    #[default]
    ImageNet,
    /// Random initialisation
    None,
    /// A weights file to load
    Path(PathBuf),
}

impl From<Option<String>> for Weights {
    fn from(value: Option<String>) -> Self {
        match value {
            None => Weights::None,
            Some(s) if s == "imagenet" => Weights::ImageNet,
            Some(s) => Weights::Path(PathBuf::from(s)),
        }
    }
}

impl From<Weights> for Option<String> {
    fn from(value: Weights) -> Self {
        match value {
            Weights::ImageNet => Some("imagenet".to_string()),
            Weights::None => None,
            Weights::Path(path) => Some(path.to_string_lossy().into_owned()),
        }
    }
}

impl fmt::Display for Weights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weights::ImageNet => write!(f, "imagenet"),
            Weights::None => write!(f, "none"),
            Weights::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Global pooling applied to the last feature map when `include_top` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[serde(alias = "average")]
    Avg,
    Max,
}

/// Input image shape in channels-last order; unknown spatial dimensions are
/// allowed when the classifier head is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "(Option<usize>, Option<usize>, usize)",
    into = "(Option<usize>, Option<usize>, usize)"
)]
pub struct InputShape {
    pub rows: Option<usize>,
    pub cols: Option<usize>,
    pub channels: usize,
}

impl InputShape {
    /// A fully static shape
    pub fn new(rows: usize, cols: usize, channels: usize) -> Self {
        Self { rows: Some(rows), cols: Some(cols), channels }
    }

    /// Square RGB shape
    pub fn square(size: usize) -> Self {
        Self::new(size, size, 3)
    }

    /// Shape with unknown spatial dimensions
    pub fn dynamic(channels: usize) -> Self {
        Self { rows: None, cols: None, channels }
    }

    pub fn is_static(&self) -> bool {
        self.rows.is_some() && self.cols.is_some()
    }
}

impl From<(Option<usize>, Option<usize>, usize)> for InputShape {
    fn from((rows, cols, channels): (Option<usize>, Option<usize>, usize)) -> Self {
        Self { rows, cols, channels }
    }
}

impl From<InputShape> for (Option<usize>, Option<usize>, usize) {
    fn from(shape: InputShape) -> Self {
        (shape.rows, shape.cols, shape.channels)
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dim = |d: Option<usize>| d.map_or_else(|| "None".to_string(), |d| d.to_string());
        write!(f, "({}, {}, {})", dim(self.rows), dim(self.cols), self.channels)
    }
}

fn default_include_top() -> bool {
    true
}

fn default_classes() -> usize {
    1000
}

/// Options controlling architecture construction.
///
/// The loader forwards this bundle untouched; validating it is the backend's
/// job. Architecture-specific options (`alpha`, `depth_multiplier`,
/// `dropout`, ...) travel in [`AppConfig::extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Whether to include the fully connected classifier at the top
    #[serde(default = "default_include_top")]
    pub include_top: bool,

    #[serde(default)]
    pub weights: Weights,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<InputShape>,

    /// Only honoured when `include_top` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pooling: Option<Pooling>,

    /// Only meaningful with `include_top` and no ImageNet weights
    #[serde(default = "default_classes")]
    pub classes: usize,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            include_top: default_include_top(),
            weights: Weights::default(),
            input_shape: None,
            pooling: None,
            classes: default_classes(),
            extra: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_include_top(mut self, include_top: bool) -> Self {
        self.include_top = include_top;
        self
    }

    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_input_shape(mut self, shape: InputShape) -> Self {
        self.input_shape = Some(shape);
        self
    }

    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = Some(pooling);
        self
    }

    pub fn with_classes(mut self, classes: usize) -> Self {
        self.classes = classes;
        self
    }

    /// Set an architecture-specific option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Read an architecture-specific option
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Parse a bundle from JSON such as
    /// `{"include_top": false, "weights": null, "pooling": "avg"}`
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_json_str(&raw)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Process settings shared by backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZooSettings {
    /// Root of the model-zoo cache
    pub home: PathBuf,
}

impl ZooSettings {
    /// Read settings from the environment.
    ///
    /// `MODEL_ZOO_HOME` wins; otherwise the platform cache directory is used,
    /// falling back to `./.model-zoo`.
    pub fn from_env() -> Self {
        let home = match std::env::var_os(MODEL_ZOO_HOME_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::cache_dir()
                .map(|dir| dir.join("model-zoo"))
                .unwrap_or_else(|| PathBuf::from(".model-zoo")),
        };
        Self { home }
    }

    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Directory pre-trained weight files are cached in
    pub fn weights_dir(&self) -> PathBuf {
        self.home.join("weights")
    }
}

impl Default for ZooSettings {
    fn default() -> Self {
        Self::from_env()
    }
}
