//! Configuration checks applied before any layer is built
//!
//! Follows the Keras applications rules: ImageNet weights pin the class
//! count and, with the classifier head, the input shape; inputs must reach
//! the architecture's minimum size; the head needs a static input shape.

use model_zoo::{AppConfig, Architecture, InputShape, Pooling, Weights};

use crate::error::VisionError;

const MOBILENET_ALPHAS: [f64; 4] = [0.25, 0.5, 0.75, 1.0];
const MOBILENET_ROWS: [usize; 4] = [128, 160, 192, 224];
const MOBILENET_V2_ALPHAS: [f64; 6] = [0.35, 0.5, 0.75, 1.0, 1.3, 1.4];
const MOBILENET_V2_ROWS: [usize; 5] = [96, 128, 160, 192, 224];

/// A configuration bundle after validation and defaulting
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub architecture: Architecture,
    pub include_top: bool,
    pub classes: usize,
    /// Always `None` when `include_top` is set
    pub pooling: Option<Pooling>,
    pub input_shape: InputShape,
    pub weights: Weights,
    /// Width multiplier (MobileNet family)
    pub alpha: f64,
    /// Depthwise channel multiplier (MobileNet)
    pub depth_multiplier: usize,
    /// Dropout rate before the classifier (MobileNet)
    pub dropout: f64,
    /// Rows of the ImageNet weights to load (MobileNet family)
    pub weights_rows: usize,
}

fn allowed_options(architecture: Architecture) -> &'static [&'static str] {
    match architecture {
        Architecture::MobileNet => &["alpha", "depth_multiplier", "dropout"],
        Architecture::MobileNetV2 => &["alpha"],
        _ => &[],
    }
}

fn number(architecture: Architecture, config: &AppConfig, key: &str, default: f64) -> Result<f64, VisionError> {
    match config.option(key) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| VisionError::config(architecture, format!("`{key}` must be a number, got {value}"))),
    }
}

fn positive_integer(
    architecture: Architecture,
    config: &AppConfig,
    key: &str,
    default: usize,
) -> Result<usize, VisionError> {
    match config.option(key) {
        None => Ok(default),
        Some(value) => value
            .as_u64()
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .ok_or_else(|| {
                VisionError::config(architecture, format!("`{key}` must be a positive integer, got {value}"))
            }),
    }
}

fn check_options(architecture: Architecture, config: &AppConfig) -> Result<(), VisionError> {
    let allowed = allowed_options(architecture);
    match config.extra.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(VisionError::config(architecture, format!("unexpected option `{key}`"))),
        None => Ok(()),
    }
}

fn check_weights(architecture: Architecture, config: &AppConfig) -> Result<(), VisionError> {
    if let Weights::Path(path) = &config.weights {
        if !path.exists() {
            return Err(VisionError::config(
                architecture,
                format!(
                    "the `weights` argument should be either `None` (random initialization), `imagenet` \
                     (pre-training on ImageNet), or the path to the weights file to be loaded; {} does not exist",
                    path.display()
                ),
            ));
        }
    }
    if config.classes == 0 {
        return Err(VisionError::config(architecture, "`classes` must be positive"));
    }
    if config.weights == Weights::ImageNet && config.include_top && config.classes != 1000 {
        return Err(VisionError::config(
            architecture,
            format!(
                "if using `weights` as `\"imagenet\"` with `include_top` as true, `classes` should be 1000, got {}",
                config.classes
            ),
        ));
    }
    Ok(())
}

/// Keras `_obtain_input_shape`: pick and check the input shape.
pub fn obtain_input_shape(
    architecture: Architecture,
    given: Option<InputShape>,
    default_size: usize,
    min_size: usize,
    require_flatten: bool,
    imagenet: bool,
) -> Result<InputShape, VisionError> {
    let default_shape = match given {
        Some(shape) if !imagenet => shape,
        _ => InputShape::square(default_size),
    };

    if imagenet && require_flatten {
        if let Some(shape) = given {
            if shape != default_shape {
                return Err(VisionError::config(
                    architecture,
                    format!(
                        "when setting `include_top=True` and loading `imagenet` weights, `input_shape` should be {}",
                        default_shape
                    ),
                ));
            }
        }
        return Ok(default_shape);
    }

    let shape = match given {
        Some(shape) => {
            if shape.channels == 0 || (imagenet && shape.channels != 3) {
                return Err(VisionError::config(
                    architecture,
                    format!("the input must have 3 channels; got `input_shape={}`", shape),
                ));
            }
            let too_small = [shape.rows, shape.cols].into_iter().flatten().any(|d| d < min_size);
            if too_small {
                return Err(VisionError::config(
                    architecture,
                    format!("input size must be at least {min_size}x{min_size}; got `input_shape={}`", shape),
                ));
            }
            shape
        }
        None if require_flatten => default_shape,
        None => InputShape::dynamic(3),
    };

    if require_flatten && !shape.is_static() {
        return Err(VisionError::config(
            architecture,
            format!("if `include_top` is true, you should specify a static `input_shape`; got `input_shape={}`", shape),
        ));
    }
    Ok(shape)
}

/// Validate `config` for `architecture` and fill in defaults.
pub fn resolve(architecture: Architecture, config: &AppConfig) -> Result<ResolvedConfig, VisionError> {
    check_options(architecture, config)?;
    check_weights(architecture, config)?;

    let imagenet = config.weights == Weights::ImageNet;
    let alpha = number(architecture, config, "alpha", 1.0)?;
    let depth_multiplier = positive_integer(architecture, config, "depth_multiplier", 1)?;
    let dropout = number(architecture, config, "dropout", 1e-3)?;
    if !(0.0..1.0).contains(&dropout) {
        return Err(VisionError::config(architecture, format!("`dropout` must be in [0, 1), got {dropout}")));
    }
    if alpha <= 0.0 {
        return Err(VisionError::config(architecture, format!("`alpha` must be positive, got {alpha}")));
    }

    let spec = architecture.spec();
    let mut default_size = spec.default_size;
    let mut weights_rows = spec.default_size;

    let supported_rows: &[usize] = match architecture {
        Architecture::MobileNet => &MOBILENET_ROWS,
        Architecture::MobileNetV2 => &MOBILENET_V2_ROWS,
        _ => &[],
    };
    if !supported_rows.is_empty() {
        let requested = config.input_shape.and_then(|s| s.rows.zip(s.cols));
        match requested {
            Some((rows, cols)) if rows == cols && supported_rows.contains(&rows) => {
                default_size = rows;
                weights_rows = rows;
            }
            Some((rows, cols)) if imagenet => {
                tracing::warn!(
                    architecture = architecture.name(),
                    rows,
                    cols,
                    "input shape is not one of the pre-trained sizes; loading weights for 224x224"
                );
            }
            _ => {}
        }
    }

    if imagenet {
        match architecture {
            Architecture::MobileNet => {
                if depth_multiplier != 1 {
                    return Err(VisionError::config(
                        architecture,
                        "if imagenet weights are being loaded, depth multiplier must be 1",
                    ));
                }
                if !MOBILENET_ALPHAS.contains(&alpha) {
                    return Err(VisionError::config(
                        architecture,
                        format!("if imagenet weights are being loaded, alpha can be one of 0.25, 0.50, 0.75 or 1.0 only; got {alpha}"),
                    ));
                }
            }
            Architecture::MobileNetV2 => {
                if !MOBILENET_V2_ALPHAS.contains(&alpha) {
                    return Err(VisionError::config(
                        architecture,
                        format!("if imagenet weights are being loaded, alpha can be one of 0.35, 0.50, 0.75, 1.0, 1.3 or 1.4 only; got {alpha}"),
                    ));
                }
            }
            _ => {}
        }
    }

    let input_shape = obtain_input_shape(
        architecture,
        config.input_shape,
        default_size,
        spec.min_size,
        config.include_top,
        imagenet,
    )?;

    let pooling = if config.include_top {
        if config.pooling.is_some() {
            tracing::debug!(architecture = architecture.name(), "`pooling` is ignored with `include_top`");
        }
        None
    } else {
        config.pooling
    };

    Ok(ResolvedConfig {
        architecture,
        include_top: config.include_top,
        classes: config.classes,
        pooling,
        input_shape,
        weights: config.weights.clone(),
        alpha,
        depth_multiplier,
        dropout,
        weights_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_weights() -> AppConfig {
        AppConfig::new().with_weights(Weights::None)
    }

    #[test]
    fn test_imagenet_with_top_pins_classes() {
        let config = AppConfig::new().with_classes(10);
        let err = resolve(Architecture::DenseNet121, &config).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("classes"));

        let ok = resolve(Architecture::DenseNet121, &no_weights().with_classes(10)).unwrap();
        assert_eq!(ok.classes, 10);
    }

    #[test]
    fn test_imagenet_with_top_requires_default_shape() {
        let config = AppConfig::new().with_input_shape(InputShape::square(256));
        assert!(resolve(Architecture::ResNet50, &config).is_err());

        let ok = resolve(Architecture::ResNet50, &AppConfig::new()).unwrap();
        assert_eq!(ok.input_shape, InputShape::square(224));
    }

    #[test]
    fn test_minimum_size_is_enforced() {
        let config = no_weights().with_include_top(false).with_input_shape(InputShape::square(196));
        let err = resolve(Architecture::ResNet50, &config).unwrap_err();
        assert!(err.to_string().contains("at least 197x197"));

        let config = no_weights().with_include_top(false).with_input_shape(InputShape::square(197));
        assert!(resolve(Architecture::ResNet50, &config).is_ok());
    }

    #[test]
    fn test_headless_without_shape_is_dynamic() {
        let config = AppConfig::new().with_include_top(false).with_pooling(Pooling::Max);
        let resolved = resolve(Architecture::Xception, &config).unwrap();
        assert_eq!(resolved.input_shape, InputShape::dynamic(3));
        assert_eq!(resolved.pooling, Some(Pooling::Max));
    }

    #[test]
    fn test_top_requires_static_shape() {
        let config = no_weights().with_input_shape(InputShape::dynamic(3));
        assert!(resolve(Architecture::VGG16, &config).is_err());
    }

    #[test]
    fn test_imagenet_requires_three_channels() {
        let config = AppConfig::new().with_include_top(false).with_input_shape(InputShape::new(224, 224, 1));
        assert!(resolve(Architecture::VGG19, &config).is_err());
        let config = no_weights().with_include_top(false).with_input_shape(InputShape::new(224, 224, 1));
        assert!(resolve(Architecture::VGG19, &config).is_ok());
    }

    #[test]
    fn test_mobilenet_options() {
        let config = AppConfig::new().with_option("alpha", 0.6);
        assert!(resolve(Architecture::MobileNet, &config).is_err());

        let config = AppConfig::new().with_option("depth_multiplier", 2);
        assert!(resolve(Architecture::MobileNet, &config).is_err());

        let config = no_weights().with_option("alpha", 0.6).with_option("depth_multiplier", 2);
        let resolved = resolve(Architecture::MobileNet, &config).unwrap();
        assert_eq!(resolved.depth_multiplier, 2);

        let config = AppConfig::new().with_option("alpha", 1.3);
        assert!(resolve(Architecture::MobileNetV2, &config).is_ok());
    }

    #[test]
    fn test_mobilenet_weight_rows_follow_input() {
        let config = AppConfig::new().with_include_top(false).with_input_shape(InputShape::square(160));
        let resolved = resolve(Architecture::MobileNet, &config).unwrap();
        assert_eq!(resolved.weights_rows, 160);
    }

    #[test]
    fn test_unknown_options_are_rejected() {
        let config = AppConfig::new().with_option("alpha", 0.5);
        let err = resolve(Architecture::VGG16, &config).unwrap_err();
        assert!(err.to_string().contains("unexpected option `alpha`"));
    }

    #[test]
    fn test_missing_weights_file_is_rejected() {
        let config = AppConfig::new().with_weights(Weights::Path("/nonexistent/weights.h5".into()));
        assert!(resolve(Architecture::Xception, &config).is_err());
    }
}
