//! Keras application topologies on the symbolic graph
//!
//! Every architecture is built into the graph of the active session (see
//! [`get_session`]) with the layer names Keras uses, so intermediate tensors
//! can be fetched by name afterwards (`block4_conv3/Relu:0`,
//! `activation_49/Relu:0`, `mixed10/concat:0`, ...).

mod densenet;
mod inception_resnet_v2;
mod inception_v3;
mod mobilenet;
mod mobilenet_v2;
mod nasnet;
mod resnet;
mod vgg;
mod xception;

use model_zoo::{AppConfig, Architecture, Model, Pooling, ZooSettings};

use crate::builder::{Activation, GraphBuilder};
use crate::error::VisionError;
use crate::graph::{Graph, SymbolicTensor};
use crate::session::{get_session, Session};
use crate::validation::{resolve, ResolvedConfig};
use crate::weights::{resolve_weights, WeightSource};

type Result<T> = std::result::Result<T, VisionError>;

/// A model built into a session graph.
#[derive(Debug, Clone)]
pub struct SymbolicModel {
    name: String,
    session: Session,
    input: SymbolicTensor,
    output: SymbolicTensor,
    weights: WeightSource,
    config: ResolvedConfig,
}

impl SymbolicModel {
    /// Keras model name, e.g. `resnet50`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn architecture(&self) -> Architecture {
        self.config.architecture
    }

    /// The session whose graph holds this model
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn graph(&self) -> &Graph {
        self.session.graph()
    }

    pub fn input(&self) -> &SymbolicTensor {
        &self.input
    }

    pub fn output(&self) -> &SymbolicTensor {
        &self.output
    }

    pub fn weights(&self) -> &WeightSource {
        &self.weights
    }

    /// The validated configuration the model was built with
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }
}

impl Model for SymbolicModel {
    type Tensor = SymbolicTensor;

    fn input_at(&self, index: usize) -> Option<SymbolicTensor> {
        (index == 0).then(|| self.input.clone())
    }

    fn output_at(&self, index: usize) -> Option<SymbolicTensor> {
        (index == 0).then(|| self.output.clone())
    }
}

/// Options that do not belong in a model's configuration bundle
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub settings: ZooSettings,
    /// Fail instead of building when ImageNet weights are not cached
    pub require_cached_weights: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { settings: ZooSettings::from_env(), require_cached_weights: false }
    }
}

fn model_name(config: &ResolvedConfig) -> String {
    let rows = config.input_shape.rows.unwrap_or(config.weights_rows);
    match config.architecture {
        Architecture::MobileNet => format!("mobilenet_{:.2}_{rows}", config.alpha),
        Architecture::MobileNetV2 => format!("mobilenetv2_{:.2}_{rows}", config.alpha),
        Architecture::InceptionV3 => "inception_v3".to_string(),
        Architecture::InceptionResNetV2 => "inception_resnet_v2".to_string(),
        Architecture::NASNetLarge | Architecture::NASNetMobile => "NASNet".to_string(),
        other => other.name().to_lowercase(),
    }
}

/// Build `architecture` into the active session's graph.
pub fn build(architecture: Architecture, config: &AppConfig, options: &BuildOptions) -> Result<SymbolicModel> {
    let resolved = resolve(architecture, config)?;
    let weights = resolve_weights(&resolved, &options.settings, options.require_cached_weights)?;

    let session = get_session();
    let b = GraphBuilder::new(session.graph());
    let input = b.input(resolved.input_shape);

    let output = match architecture {
        Architecture::DenseNet121 => densenet::build(&b, &input, &resolved, [6, 12, 24, 16])?,
        Architecture::DenseNet169 => densenet::build(&b, &input, &resolved, [6, 12, 32, 32])?,
        Architecture::DenseNet201 => densenet::build(&b, &input, &resolved, [6, 12, 48, 32])?,
        Architecture::InceptionResNetV2 => inception_resnet_v2::build(&b, &input, &resolved)?,
        Architecture::InceptionV3 => inception_v3::build(&b, &input, &resolved)?,
        Architecture::MobileNet => mobilenet::build(&b, &input, &resolved)?,
        Architecture::MobileNetV2 => mobilenet_v2::build(&b, &input, &resolved)?,
        Architecture::NASNetLarge => nasnet::build(&b, &input, &resolved, nasnet::NasNetConfig::large())?,
        Architecture::NASNetMobile => nasnet::build(&b, &input, &resolved, nasnet::NasNetConfig::mobile())?,
        Architecture::ResNet50 => resnet::build(&b, &input, &resolved)?,
        Architecture::VGG16 => vgg::build(&b, &input, &resolved, [2, 2, 3, 3, 3])?,
        Architecture::VGG19 => vgg::build(&b, &input, &resolved, [2, 2, 4, 4, 4])?,
        Architecture::Xception => xception::build(&b, &input, &resolved)?,
    };

    let name = model_name(&resolved);
    tracing::debug!(
        model = %name,
        session = session.id(),
        input = %input,
        output = %output,
        weights = %weights,
        "built model"
    );
    Ok(SymbolicModel { name, session, input, output, weights, config: resolved })
}

/// Global pooling applied to the last feature map when the classifier head
/// is left out
pub(crate) fn pool_features(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    pooling: Option<Pooling>,
    names: Option<(&str, &str)>,
) -> Result<SymbolicTensor> {
    match pooling {
        None => Ok(x.clone()),
        Some(Pooling::Avg) => b.global_avg_pool(x, names.map(|(avg, _)| avg)),
        Some(Pooling::Max) => b.global_max_pool(x, names.map(|(_, max)| max)),
    }
}

/// `GlobalAveragePooling2D` followed by a softmax classifier, or the pooled
/// features without the top
pub(crate) fn classifier_head(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    config: &ResolvedConfig,
    pool_name: Option<&str>,
    predictions: &str,
) -> Result<SymbolicTensor> {
    if config.include_top {
        let x = b.global_avg_pool(x, pool_name)?;
        b.dense(&x, Some(predictions), config.classes, Some(Activation::Softmax))
    } else {
        pool_features(b, x, config.pooling, None)
    }
}

macro_rules! constructors {
    ($($(#[$doc:meta])* $func:ident => $arch:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $func(config: &AppConfig) -> Result<SymbolicModel> {
                build(Architecture::$arch, config, &BuildOptions::default())
            }
        )*
    };
}

constructors! {
    /// DenseNet-121 with blocks `[6, 12, 24, 16]`
    densenet121 => DenseNet121;
    /// DenseNet-169 with blocks `[6, 12, 32, 32]`
    densenet169 => DenseNet169;
    /// DenseNet-201 with blocks `[6, 12, 48, 32]`
    densenet201 => DenseNet201;
    inception_resnet_v2 => InceptionResNetV2;
    inception_v3 => InceptionV3;
    /// MobileNet v1; reads `alpha`, `depth_multiplier` and `dropout`
    mobilenet => MobileNet;
    /// MobileNet v2; reads `alpha`
    mobilenet_v2 => MobileNetV2;
    nasnet_large => NASNetLarge;
    nasnet_mobile => NASNetMobile;
    resnet50 => ResNet50;
    vgg16 => VGG16;
    vgg19 => VGG19;
    xception => Xception;
}
