//! Supported architectures and their entry points
//!
//! Every entry point forwards to [`load_architecture`] with its
//! [`Architecture`]; the per-architecture facts live in one static table.

use std::fmt;
use std::str::FromStr;

use crate::backend::Backend;
use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::loader::{load, LoadResult};

/// Pre-trained image classification architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Architecture {
    DenseNet121,
    DenseNet169,
    DenseNet201,
    InceptionResNetV2,
    InceptionV3,
    MobileNet,
    MobileNetV2,
    NASNetLarge,
    NASNetMobile,
    ResNet50,
    VGG16,
    VGG19,
    Xception,
}

/// Static facts about an architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchitectureSpec {
    pub architecture: Architecture,
    /// Keras application name
    pub name: &'static str,
    /// Square input size the ImageNet weights were trained at
    pub default_size: usize,
    /// Smallest accepted input rows/cols
    pub min_size: usize,
    /// Channels of the last convolutional feature map
    pub feature_channels: usize,
    /// Reference documentation for the architecture
    pub docs: &'static str,
}

const fn spec(
    architecture: Architecture,
    name: &'static str,
    default_size: usize,
    min_size: usize,
    feature_channels: usize,
    docs: &'static str,
) -> ArchitectureSpec {
    ArchitectureSpec { architecture, name, default_size, min_size, feature_channels, docs }
}

static SPECS: [ArchitectureSpec; 13] = [
    spec(Architecture::DenseNet121, "DenseNet121", 224, 32, 1024, "https://keras.io/applications/#densenet"),
    spec(Architecture::DenseNet169, "DenseNet169", 224, 32, 1664, "https://keras.io/applications/#densenet"),
    spec(Architecture::DenseNet201, "DenseNet201", 224, 32, 1920, "https://keras.io/applications/#densenet"),
    spec(
        Architecture::InceptionResNetV2,
        "InceptionResNetV2",
        299,
        139,
        1536,
        "https://keras.io/applications/#inceptionresnetv2",
    ),
    spec(Architecture::InceptionV3, "InceptionV3", 299, 139, 2048, "https://keras.io/applications/#inceptionv3"),
    spec(Architecture::MobileNet, "MobileNet", 224, 32, 1024, "https://keras.io/applications/#mobilenet"),
    spec(Architecture::MobileNetV2, "MobileNetV2", 224, 32, 1280, "https://keras.io/applications/#mobilenetv2"),
    spec(Architecture::NASNetLarge, "NASNetLarge", 331, 32, 4032, "https://keras.io/applications/#nasnet"),
    spec(Architecture::NASNetMobile, "NASNetMobile", 224, 32, 1056, "https://keras.io/applications/#nasnet"),
    spec(Architecture::ResNet50, "ResNet50", 224, 197, 2048, "https://keras.io/applications/#resnet50"),
    spec(Architecture::VGG16, "VGG16", 224, 48, 512, "https://keras.io/applications/#vgg16"),
    spec(Architecture::VGG19, "VGG19", 224, 48, 512, "https://keras.io/applications/#vgg19"),
    spec(Architecture::Xception, "Xception", 299, 71, 2048, "https://keras.io/applications/#xception"),
];

impl Architecture {
    /// Every supported architecture, in registry order
    pub const ALL: [Architecture; 13] = [
        Architecture::DenseNet121,
        Architecture::DenseNet169,
        Architecture::DenseNet201,
        Architecture::InceptionResNetV2,
        Architecture::InceptionV3,
        Architecture::MobileNet,
        Architecture::MobileNetV2,
        Architecture::NASNetLarge,
        Architecture::NASNetMobile,
        Architecture::ResNet50,
        Architecture::VGG16,
        Architecture::VGG19,
        Architecture::Xception,
    ];

    pub fn spec(self) -> &'static ArchitectureSpec {
        &SPECS[self as usize]
    }

    /// Keras application name, e.g. `"ResNet50"`
    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn default_size(self) -> usize {
        self.spec().default_size
    }

    pub fn min_size(self) -> usize {
        self.spec().min_size
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = ConfigError;

    /// Case-insensitive; `_` and `-` are ignored, so `"nasnet_large"`
    /// matches `NASNetLarge`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String =
            s.chars().filter(|c| *c != '_' && *c != '-').flat_map(char::to_lowercase).collect();
        Architecture::ALL
            .into_iter()
            .find(|arch| arch.name().to_lowercase() == wanted)
            .ok_or_else(|| ConfigError::UnknownArchitecture(s.to_string()))
    }
}

/// Load `architecture` through `backend`.
///
/// The parameterised form of the per-architecture entry points.
pub fn load_architecture<B, S>(
    backend: &B,
    architecture: Architecture,
    context: Option<B::Context>,
    include_tensors: &[S],
    config: &AppConfig,
) -> LoadResult<B>
where
    B: Backend,
    S: AsRef<str>,
{
    let span = tracing::debug_span!(
        "load",
        architecture = architecture.name(),
        backend = backend.name(),
        extra_tensors = include_tensors.len()
    );
    let _entered = span.enter();

    load(backend, context, |config| backend.construct(architecture, config), config, include_tensors)
}

macro_rules! entry_points {
    ($($(#[$doc:meta])* $func:ident => $arch:ident, min = $min:literal;)*) => {
        /// Minimum sizes quoted in the entry point docs
        #[cfg(test)]
        const DOCUMENTED_MIN_SIZES: &[(Architecture, usize)] = &[$((Architecture::$arch, $min)),*];

        $(
            $(#[$doc])*
            #[doc = ""]
            #[doc = concat!("Minimum input size: ", $min, "x", $min, ".")]
            #[doc = ""]
            #[doc = "# Arguments"]
            #[doc = ""]
            #[doc = "* `backend` - pre-trained model library to build with"]
            #[doc = "* `context` - context to build in; `None` creates a fresh one. The"]
            #[doc = "  previously active context is restored before returning."]
            #[doc = "* `include_tensors` - names of additional graph tensors to return, e.g."]
            #[doc = "  `\"block1_conv1/Relu:0\"`"]
            #[doc = "* `config` - forwarded to the constructor: `include_top`, `weights`"]
            #[doc = "  (`imagenet`, none or a file path), `input_shape`, `pooling`"]
            #[doc = "  (none, `avg`, `max`; only without the top) and `classes` (only with"]
            #[doc = "  the top and without ImageNet weights)."]
            #[doc = ""]
            #[doc = "# Returns"]
            #[doc = ""]
            #[doc = "The input tensor, the output tensor (softmax or pooled features) and"]
            #[doc = "the requested tensors in request order."]
            pub fn $func<B, S>(
                backend: &B,
                context: Option<B::Context>,
                include_tensors: &[S],
                config: &AppConfig,
            ) -> LoadResult<B>
            where
                B: Backend,
                S: AsRef<str>,
            {
                load_architecture(backend, Architecture::$arch, context, include_tensors, config)
            }
        )*
    };
}

entry_points! {
    /// DenseNet-121 pre-trained on ImageNet.
    /// See <https://keras.io/applications/#densenet>.
    densenet121 => DenseNet121, min = 32;
    /// DenseNet-169 pre-trained on ImageNet.
    /// See <https://keras.io/applications/#densenet>.
    densenet169 => DenseNet169, min = 32;
    /// DenseNet-201 pre-trained on ImageNet.
    /// See <https://keras.io/applications/#densenet>.
    densenet201 => DenseNet201, min = 32;
    /// Inception-ResNet v2 pre-trained on ImageNet.
    /// See <https://keras.io/applications/#inceptionresnetv2>.
    inception_resnet_v2 => InceptionResNetV2, min = 139;
    /// Inception v3 pre-trained on ImageNet.
    /// See <https://keras.io/applications/#inceptionv3>.
    inception_v3 => InceptionV3, min = 139;
    /// MobileNet pre-trained on ImageNet. Also accepts `alpha`,
    /// `depth_multiplier` and `dropout`.
    /// See <https://keras.io/applications/#mobilenet>.
    mobilenet => MobileNet, min = 32;
    /// MobileNet v2 pre-trained on ImageNet. Also accepts `alpha`.
    /// See <https://keras.io/applications/#mobilenetv2>.
    mobilenet_v2 => MobileNetV2, min = 32;
    /// NASNet-A Large pre-trained on ImageNet.
    /// See <https://keras.io/applications/#nasnet>.
    nasnet_large => NASNetLarge, min = 32;
    /// NASNet-A Mobile pre-trained on ImageNet.
    /// See <https://keras.io/applications/#nasnet>.
    nasnet_mobile => NASNetMobile, min = 32;
    /// ResNet-50 pre-trained on ImageNet.
    /// See <https://keras.io/applications/#resnet50>.
    resnet50 => ResNet50, min = 197;
    /// VGG-16 pre-trained on ImageNet.
    /// See <https://keras.io/applications/#vgg16>.
    vgg16 => VGG16, min = 48;
    /// VGG-19 pre-trained on ImageNet.
    /// See <https://keras.io/applications/#vgg19>.
    vgg19 => VGG19, min = 48;
    /// Xception pre-trained on ImageNet.
    /// See <https://keras.io/applications/#xception>.
    xception => Xception, min = 71;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_enum_order() {
        for (index, arch) in Architecture::ALL.iter().enumerate() {
            assert_eq!(SPECS[index].architecture, *arch);
            assert_eq!(arch.spec().architecture, *arch);
        }
    }

    #[test]
    fn test_documented_min_sizes_match_table() {
        assert_eq!(DOCUMENTED_MIN_SIZES.len(), Architecture::ALL.len());
        for (arch, min) in DOCUMENTED_MIN_SIZES {
            assert_eq!(arch.min_size(), *min, "{arch}");
        }
    }

    #[test]
    fn test_parse_is_lenient() {
        assert_eq!("resnet50".parse::<Architecture>().unwrap(), Architecture::ResNet50);
        assert_eq!("nasnet_large".parse::<Architecture>().unwrap(), Architecture::NASNetLarge);
        assert_eq!("Inception-ResNet-V2".parse::<Architecture>().unwrap(), Architecture::InceptionResNetV2);
        assert!(matches!(
            "alexnet".parse::<Architecture>(),
            Err(ConfigError::UnknownArchitecture(name)) if name == "alexnet"
        ));
    }

    #[test]
    fn test_min_never_exceeds_default() {
        for arch in Architecture::ALL {
            assert!(arch.min_size() <= arch.default_size(), "{arch}");
        }
    }
}
