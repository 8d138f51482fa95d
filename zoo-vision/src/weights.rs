//! Resolution of the `weights` option to a concrete source

use std::fmt;
use std::path::{Path, PathBuf};

use model_zoo::{Architecture, Weights, ZooSettings};

use crate::error::VisionError;
use crate::validation::ResolvedConfig;

/// Where a model's parameters come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// ImageNet weights from the local cache
    ImageNet { path: PathBuf, cached: bool },
    /// A user-supplied weights file
    File(PathBuf),
    /// Random initialisation
    Random,
}

impl WeightSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            WeightSource::ImageNet { path, .. } | WeightSource::File(path) => Some(path),
            WeightSource::Random => None,
        }
    }

    pub fn is_pretrained(&self) -> bool {
        !matches!(self, WeightSource::Random)
    }
}

impl fmt::Display for WeightSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightSource::ImageNet { path, cached: true } => write!(f, "imagenet ({})", path.display()),
            WeightSource::ImageNet { path, cached: false } => {
                write!(f, "imagenet (missing: {})", path.display())
            }
            WeightSource::File(path) => write!(f, "{}", path.display()),
            WeightSource::Random => write!(f, "random"),
        }
    }
}

/// Keras spelling of MobileNet v1 width multipliers in weight file names
fn mobilenet_alpha(alpha: f64) -> &'static str {
    if alpha == 1.0 {
        "1_0"
    } else if alpha == 0.75 {
        "7_5"
    } else if alpha == 0.5 {
        "5_0"
    } else {
        "2_5"
    }
}

/// File name of the ImageNet weights Keras publishes for this configuration
pub fn imagenet_file_name(resolved: &ResolvedConfig) -> String {
    let top = resolved.include_top;
    let standard = |stem: &str| {
        if top {
            format!("{stem}_weights_tf_dim_ordering_tf_kernels.h5")
        } else {
            format!("{stem}_weights_tf_dim_ordering_tf_kernels_notop.h5")
        }
    };
    match resolved.architecture {
        Architecture::DenseNet121 => standard("densenet121"),
        Architecture::DenseNet169 => standard("densenet169"),
        Architecture::DenseNet201 => standard("densenet201"),
        Architecture::InceptionResNetV2 => standard("inception_resnet_v2"),
        Architecture::InceptionV3 => standard("inception_v3"),
        Architecture::ResNet50 => standard("resnet50"),
        Architecture::VGG16 => standard("vgg16"),
        Architecture::VGG19 => standard("vgg19"),
        Architecture::Xception => standard("xception"),
        Architecture::MobileNet => {
            let suffix = if top { "tf.h5" } else { "tf_no_top.h5" };
            format!("mobilenet_{}_{}_{suffix}", mobilenet_alpha(resolved.alpha), resolved.weights_rows)
        }
        Architecture::MobileNetV2 => {
            let suffix = if top { "" } else { "_no_top" };
            format!(
                "mobilenet_v2_weights_tf_dim_ordering_tf_kernels_{:?}_{}{suffix}.h5",
                resolved.alpha, resolved.weights_rows
            )
        }
        Architecture::NASNetLarge => {
            let name = if top { "NASNet-large.h5" } else { "NASNet-large-no-top.h5" };
            name.to_string()
        }
        Architecture::NASNetMobile => {
            let name = if top { "NASNet-mobile.h5" } else { "NASNet-mobile-no-top.h5" };
            name.to_string()
        }
    }
}

/// Resolve the weights of `resolved` against the cache in `settings`.
///
/// With `require_cached`, ImageNet weights missing from the cache are an
/// error; otherwise the expected location is recorded and building proceeds.
pub fn resolve_weights(
    resolved: &ResolvedConfig,
    settings: &ZooSettings,
    require_cached: bool,
) -> Result<WeightSource, VisionError> {
    match &resolved.weights {
        Weights::None => Ok(WeightSource::Random),
        Weights::Path(path) => Ok(WeightSource::File(path.clone())),
        Weights::ImageNet => {
            let path = settings.weights_dir().join(imagenet_file_name(resolved));
            let cached = path.is_file();
            if !cached {
                if require_cached {
                    return Err(VisionError::WeightsUnavailable {
                        architecture: resolved.architecture,
                        path,
                    });
                }
                tracing::debug!(path = %path.display(), "imagenet weights not cached");
            }
            Ok(WeightSource::ImageNet { path, cached })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::resolve;
    use model_zoo::{AppConfig, InputShape};

    #[test]
    fn test_standard_file_names() {
        let resolved = resolve(Architecture::VGG16, &AppConfig::new()).unwrap();
        assert_eq!(imagenet_file_name(&resolved), "vgg16_weights_tf_dim_ordering_tf_kernels.h5");

        let resolved = resolve(Architecture::ResNet50, &AppConfig::new().with_include_top(false)).unwrap();
        assert_eq!(imagenet_file_name(&resolved), "resnet50_weights_tf_dim_ordering_tf_kernels_notop.h5");
    }

    #[test]
    fn test_mobilenet_file_names() {
        let config = AppConfig::new()
            .with_include_top(false)
            .with_input_shape(InputShape::square(160))
            .with_option("alpha", 0.75);
        let resolved = resolve(Architecture::MobileNet, &config).unwrap();
        assert_eq!(imagenet_file_name(&resolved), "mobilenet_7_5_160_tf_no_top.h5");

        let config = AppConfig::new().with_option("alpha", 1.4);
        let resolved = resolve(Architecture::MobileNetV2, &config).unwrap();
        assert_eq!(
            imagenet_file_name(&resolved),
            "mobilenet_v2_weights_tf_dim_ordering_tf_kernels_1.4_224.h5"
        );
    }

    #[test]
    fn test_missing_cache_entry() {
        let settings = ZooSettings::with_home("/nonexistent/model-zoo");
        let resolved = resolve(Architecture::NASNetMobile, &AppConfig::new()).unwrap();

        let source = resolve_weights(&resolved, &settings, false).unwrap();
        assert_eq!(
            source,
            WeightSource::ImageNet {
                path: PathBuf::from("/nonexistent/model-zoo/weights/NASNet-mobile.h5"),
                cached: false
            }
        );

        let err = resolve_weights(&resolved, &settings, true).unwrap_err();
        assert!(matches!(err, VisionError::WeightsUnavailable { .. }));
    }

    #[test]
    fn test_random_weights() {
        let config = AppConfig::new().with_weights(Weights::None);
        let resolved = resolve(Architecture::Xception, &config).unwrap();
        let source = resolve_weights(&resolved, &ZooSettings::with_home("/tmp"), true).unwrap();
        assert_eq!(source, WeightSource::Random);
        assert!(!source.is_pretrained());
    }
}
