//! libtorch backend for ResNet50, VGG16 and VGG19
//!
//! A [`TchContext`] owns an `nn::VarStore`; models are built into the store of
//! the active context and run once in eval mode on a zero batch, so the
//! returned input and output are real tensors. Named tensors resolve to the
//! store's variables (`layer1.0.conv1.weight`).

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use model_zoo::{AppConfig, Architecture, Backend, ExecutionContext, LookupError, Model, Pooling, Weights, ZooSettings};
use tch::{nn, nn::ModuleT, Device, Kind, Tensor};

use crate::error::VisionError;
use crate::validation::{resolve, ResolvedConfig};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Execution context holding a variable store on one device.
#[derive(Clone)]
pub struct TchContext {
    id: u64,
    device: Device,
    store: Arc<Mutex<nn::VarStore>>,
}

impl TchContext {
    pub fn new(device: Device) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            device,
            store: Arc::new(Mutex::new(nn::VarStore::new(device))),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn store(&self) -> MutexGuard<'_, nn::VarStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Names of the variables in the store
    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.store().variables().into_keys().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for TchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TchContext").field("id", &self.id).field("device", &self.device).finish_non_exhaustive()
    }
}

impl ExecutionContext for TchContext {
    type Tensor = Tensor;

    fn tensor_by_name(&self, name: &str) -> Result<Tensor, LookupError> {
        if name.is_empty() {
            return Err(LookupError::InvalidName("variable names cannot be empty".to_string()));
        }
        self.store().variables().remove(name).ok_or(LookupError::NotFound)
    }

    fn same_context(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}

fn active_slot() -> MutexGuard<'static, Option<TchContext>> {
    static ACTIVE: OnceLock<Mutex<Option<TchContext>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(None)).lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bottleneck block: 1x1, strided 3x3 and 1x1 convolutions with a projected
/// shortcut when the shape changes
fn bottleneck_block(p: &nn::Path, in_planes: i64, planes: i64, stride: i64) -> impl ModuleT {
    let no_bias = nn::ConvConfig { bias: false, ..Default::default() };
    let conv1 = nn::conv2d(p / "conv1", in_planes, planes, 1, no_bias);
    let bn1 = nn::batch_norm2d(p / "bn1", planes, Default::default());
    let conv2 = nn::conv2d(p / "conv2", planes, planes, 3, nn::ConvConfig { stride, padding: 1, ..no_bias });
    let bn2 = nn::batch_norm2d(p / "bn2", planes, Default::default());
    let conv3 = nn::conv2d(p / "conv3", planes, planes * 4, 1, no_bias);
    let bn3 = nn::batch_norm2d(p / "bn3", planes * 4, Default::default());

    let downsample = (stride != 1 || in_planes != planes * 4).then(|| {
        let conv = nn::conv2d(p / "downsample" / "0", in_planes, planes * 4, 1, nn::ConvConfig { stride, ..no_bias });
        let bn = nn::batch_norm2d(p / "downsample" / "1", planes * 4, Default::default());
        nn::seq_t().add(conv).add(bn)
    });

    nn::func_t(move |xs, train| {
        let identity = match &downsample {
            Some(ds) => xs.apply_t(ds, train),
            None => xs.shallow_clone(),
        };
        let out = xs
            .apply(&conv1)
            .apply_t(&bn1, train)
            .relu()
            .apply(&conv2)
            .apply_t(&bn2, train)
            .relu()
            .apply(&conv3)
            .apply_t(&bn3, train);
        (out + identity).relu()
    })
}

fn resnet_layer(p: nn::Path, in_planes: i64, planes: i64, blocks: i64, stride: i64) -> nn::SequentialT {
    let mut seq = nn::seq_t().add(bottleneck_block(&(&p / "0"), in_planes, planes, stride));
    for i in 1..blocks {
        seq = seq.add(bottleneck_block(&(&p / i.to_string()), planes * 4, planes, 1));
    }
    seq
}

/// Global pooling or the classifier, depending on the configuration
fn head(p: &nn::Path, features: i64, config: &ResolvedConfig, name: &str) -> nn::SequentialT {
    if config.include_top {
        let fc = nn::linear(p / name, features, config.classes as i64, Default::default());
        return nn::seq_t()
            .add_fn(|xs| xs.adaptive_avg_pool2d([1, 1]).flat_view())
            .add(fc)
            .add_fn(|xs| xs.softmax(-1, Kind::Float));
    }
    match config.pooling {
        None => nn::seq_t(),
        Some(Pooling::Avg) => nn::seq_t().add_fn(|xs| xs.adaptive_avg_pool2d([1, 1]).flat_view()),
        Some(Pooling::Max) => nn::seq_t().add_fn(|xs| xs.adaptive_max_pool2d([1, 1]).0.flat_view()),
    }
}

/// Convert a validated dimension to a libtorch size
fn to_i64(architecture: Architecture, value: usize) -> Result<i64, VisionError> {
    i64::try_from(value)
        .map_err(|_| VisionError::config(architecture, format!("dimension {value} exceeds libtorch's size range")))
}

/// Width of the flattened `block5_pool` map: five 2x2 poolings divide each
/// spatial dimension by 32
fn vgg_flatten_width(config: &ResolvedConfig) -> Result<i64, VisionError> {
    let architecture = config.architecture;
    let shape = config.input_shape;
    let (Some(rows), Some(cols)) = (shape.rows, shape.cols) else {
        return Err(VisionError::config(architecture, "the classifier needs a static `input_shape`"));
    };
    (rows / 32)
        .checked_mul(cols / 32)
        .and_then(|cells| cells.checked_mul(512))
        .ok_or_else(|| VisionError::config(architecture, format!("`input_shape={shape}` is too large")))
        .and_then(|width| to_i64(architecture, width))
}

fn resnet50(p: &nn::Path, config: &ResolvedConfig) -> Result<nn::SequentialT, VisionError> {
    let in_channels = to_i64(config.architecture, config.input_shape.channels)?;
    let conv1 = nn::conv2d(p / "conv1", in_channels, 64, 7, nn::ConvConfig { stride: 2, padding: 3, bias: false, ..Default::default() });
    let bn1 = nn::batch_norm2d(p / "bn1", 64, Default::default());

    Ok(nn::seq_t()
        .add(conv1)
        .add(bn1)
        .add_fn(|xs| xs.relu().max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false))
        .add(resnet_layer(p / "layer1", 64, 64, 3, 1))
        .add(resnet_layer(p / "layer2", 256, 128, 4, 2))
        .add(resnet_layer(p / "layer3", 512, 256, 6, 2))
        .add(resnet_layer(p / "layer4", 1024, 512, 3, 2))
        .add(head(p, 2048, config, "fc")))
}

fn vgg(p: &nn::Path, blocks: [usize; 5], config: &ResolvedConfig) -> Result<nn::SequentialT, VisionError> {
    let features = p / "features";
    let mut seq = nn::seq_t();
    let mut in_channels = to_i64(config.architecture, config.input_shape.channels)?;
    let mut index = 0;
    for (convs, filters) in blocks.into_iter().zip([64, 128, 256, 512, 512]) {
        for _ in 0..convs {
            let conv = nn::ConvConfig { padding: 1, ..Default::default() };
            seq = seq.add(nn::conv2d(&features / index.to_string(), in_channels, filters, 3, conv));
            seq = seq.add_fn(|xs| xs.relu());
            in_channels = filters;
            index += 2;
        }
        seq = seq.add_fn(|xs| xs.max_pool2d_default(2));
        index += 1;
    }

    if !config.include_top {
        return Ok(seq.add(head(p, 512, config, "classifier")));
    }
    let flattened = vgg_flatten_width(config)?;
    let classifier = p / "classifier";
    Ok(seq
        .add_fn(|xs| xs.flat_view())
        .add(nn::linear(&classifier / "0", flattened, 4096, Default::default()))
        .add_fn_t(|xs, train| xs.relu().dropout(0.5, train))
        .add(nn::linear(&classifier / "3", 4096, 4096, Default::default()))
        .add_fn_t(|xs, train| xs.relu().dropout(0.5, train))
        .add(nn::linear(&classifier / "6", 4096, config.classes as i64, Default::default()))
        .add_fn(|xs| xs.softmax(-1, Kind::Float)))
}

/// A model built in a [`TchContext`] together with its evaluated endpoints
pub struct TchModel {
    architecture: Architecture,
    context: TchContext,
    input: Tensor,
    output: Tensor,
}

impl TchModel {
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn context(&self) -> &TchContext {
        &self.context
    }
}

impl Model for TchModel {
    type Tensor = Tensor;

    fn input_at(&self, index: usize) -> Option<Tensor> {
        (index == 0).then(|| self.input.shallow_clone())
    }

    fn output_at(&self, index: usize) -> Option<Tensor> {
        (index == 0).then(|| self.output.shallow_clone())
    }
}

/// Backend building on libtorch var stores.
#[derive(Debug, Clone)]
pub struct TchBackend {
    device: Device,
    settings: ZooSettings,
}

impl TchBackend {
    pub fn new(device: Device) -> Self {
        Self { device, settings: ZooSettings::from_env() }
    }

    pub fn with_settings(device: Device, settings: ZooSettings) -> Self {
        Self { device, settings }
    }

    /// Weights file expected in the cache for ImageNet weights
    pub fn imagenet_path(&self, architecture: Architecture) -> PathBuf {
        self.settings.weights_dir().join(format!("{}.ot", architecture.name().to_lowercase()))
    }
}

impl Default for TchBackend {
    fn default() -> Self {
        Self::new(Device::cuda_if_available())
    }
}

impl Backend for TchBackend {
    type Context = TchContext;
    type Model = TchModel;
    type Error = VisionError;

    fn name(&self) -> &'static str {
        "tch"
    }

    fn active_context(&self) -> TchContext {
        let mut slot = active_slot();
        slot.get_or_insert_with(|| TchContext::new(self.device)).clone()
    }

    fn set_active_context(&self, context: TchContext) {
        *active_slot() = Some(context);
    }

    fn new_context(&self) -> TchContext {
        TchContext::new(self.device)
    }

    fn construct(&self, architecture: Architecture, config: &AppConfig) -> Result<TchModel, VisionError> {
        let resolved = resolve(architecture, config)?;
        let context = self.active_context();

        let weights = match &resolved.weights {
            Weights::None => None,
            Weights::Path(path) => Some(path.clone()),
            Weights::ImageNet => {
                let path = self.imagenet_path(architecture);
                if !path.is_file() {
                    return Err(VisionError::WeightsUnavailable { architecture, path });
                }
                Some(path)
            }
        };

        let mut store = context.store();
        let net = {
            let root = store.root();
            match architecture {
                Architecture::ResNet50 => resnet50(&root, &resolved)?,
                Architecture::VGG16 => vgg(&root, [2, 2, 3, 3, 3], &resolved)?,
                Architecture::VGG19 => vgg(&root, [2, 2, 4, 4, 4], &resolved)?,
                other => return Err(VisionError::UnsupportedArchitecture { architecture: other, backend: "tch" }),
            }
        };
        if let Some(path) = &weights {
            store.load(path)?;
        }
        drop(store);

        let size = architecture.default_size();
        let shape = resolved.input_shape;
        let dims = [
            1,
            to_i64(architecture, shape.channels)?,
            to_i64(architecture, shape.rows.unwrap_or(size))?,
            to_i64(architecture, shape.cols.unwrap_or(size))?,
        ];
        let input = Tensor::f_zeros(dims, (Kind::Float, context.device()))?;
        let output = tch::no_grad(|| input.apply_t(&net, false));
        tracing::debug!(
            architecture = architecture.name(),
            context = context.id(),
            output = ?output.size(),
            "built model"
        );

        Ok(TchModel { architecture, context, input, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_zoo::InputShape;
    use serial_test::serial;

    fn backend() -> TchBackend {
        TchBackend::with_settings(Device::Cpu, ZooSettings::with_home("/nonexistent/model-zoo"))
    }

    fn random_weights() -> AppConfig {
        AppConfig::new().with_weights(Weights::None)
    }

    #[test]
    fn test_vgg_flatten_width_follows_input_shape() {
        let config = resolve(Architecture::VGG16, &random_weights()).unwrap();
        assert_eq!(vgg_flatten_width(&config).unwrap(), 512 * 7 * 7);

        let config = resolve(Architecture::VGG16, &random_weights().with_input_shape(InputShape::square(100))).unwrap();
        assert_eq!(vgg_flatten_width(&config).unwrap(), 512 * 3 * 3);
    }

    #[test]
    #[serial]
    fn test_vgg16_classifier_at_non_default_size() {
        let config = random_weights().with_input_shape(InputShape::square(100));
        let model = backend().construct(Architecture::VGG16, &config).unwrap();
        assert_eq!(model.output_at(0).unwrap().size(), vec![1, 1000]);
    }

    #[test]
    #[serial]
    fn test_resnet50_single_channel_input() {
        let config = random_weights().with_input_shape(InputShape::new(224, 224, 1));
        let model = backend().construct(Architecture::ResNet50, &config).unwrap();
        assert_eq!(model.input_at(0).unwrap().size(), vec![1, 1, 224, 224]);
        assert_eq!(model.output_at(0).unwrap().size(), vec![1, 1000]);
    }

    #[test]
    #[serial]
    fn test_unsupported_architecture() {
        let err = backend().construct(Architecture::Xception, &random_weights()).unwrap_err();
        assert!(matches!(err, VisionError::UnsupportedArchitecture { backend: "tch", .. }));
    }
}
