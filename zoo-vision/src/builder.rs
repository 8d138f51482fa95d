//! Symbolic layer operations
//!
//! Each operation computes the output shape of a Keras layer (channels-last,
//! leading batch dimension unknown), claims a name scope in the graph and
//! records the output tensor under the op type TensorFlow would give it.

use model_zoo::InputShape;

use crate::error::VisionError;
use crate::graph::{Dim, Graph, SymbolicTensor};

type Result<T> = std::result::Result<T, VisionError>;

/// Spatial padding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Valid,
    Same,
}

/// Non-linearities with their TF op names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Relu6,
    Softmax,
}

impl Activation {
    fn op_type(self) -> &'static str {
        match self {
            Activation::Relu => "Relu",
            Activation::Relu6 => "Relu6",
            Activation::Softmax => "Softmax",
        }
    }
}

/// Convolution options; defaults match Keras (`strides=1`, `valid`, bias,
/// no fused activation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvConfig {
    pub strides: (usize, usize),
    pub padding: Padding,
    pub bias: bool,
    pub activation: Option<Activation>,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self { strides: (1, 1), padding: Padding::Valid, bias: true, activation: None }
    }
}

impl ConvConfig {
    /// TF op type of the layer's output for a given bare op
    fn op_type(&self, bare: &'static str) -> &'static str {
        match self.activation {
            Some(activation) => activation.op_type(),
            None if self.bias => "BiasAdd",
            None => bare,
        }
    }
}

/// Output length of a windowed op along one axis
fn window_out(layer: &str, size: Dim, kernel: usize, stride: usize, padding: Padding) -> Result<Dim> {
    let Some(n) = size else { return Ok(None) };
    match padding {
        Padding::Same => Ok(Some(n.div_ceil(stride))),
        Padding::Valid if n >= kernel => Ok(Some((n - kernel) / stride + 1)),
        Padding::Valid => Err(VisionError::InvalidShape {
            layer: layer.to_string(),
            reason: format!("input size {n} is smaller than the {kernel}-wide window"),
        }),
    }
}

/// Spatial size after adding `before` and `after` zeros
fn padded(layer: &str, size: Dim, before: usize, after: usize) -> Result<Dim> {
    let Some(n) = size else { return Ok(None) };
    n.checked_add(before)
        .and_then(|n| n.checked_add(after))
        .map(Some)
        .ok_or_else(|| overflow(layer, format!("padding {n} by ({before}, {after})")))
}

/// Product of the non-batch dimensions, `None` while any is unknown
fn element_count(layer: &str, x: &SymbolicTensor) -> Result<Option<usize>> {
    let dims = &x.shape()[1..];
    if dims.iter().any(Option::is_none) {
        return Ok(None);
    }
    dims.iter()
        .flatten()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .map(Some)
        .ok_or_else(|| overflow(layer, format!("element count of {x}")))
}

fn overflow(layer: &str, what: String) -> VisionError {
    VisionError::InvalidShape { layer: layer.to_string(), reason: format!("{what} overflows usize") }
}

/// `(rows, cols, channels)` of a rank-4 tensor
fn feature_map(layer: &str, x: &SymbolicTensor) -> Result<(Dim, Dim, usize)> {
    match x.shape() {
        [_, rows, cols, Some(channels)] => Ok((*rows, *cols, *channels)),
        other => Err(VisionError::InvalidShape {
            layer: layer.to_string(),
            reason: format!("expected a rank-4 feature map, got rank {}", other.len()),
        }),
    }
}

/// Records layers into one graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder<'g> {
    graph: &'g Graph,
}

impl<'g> GraphBuilder<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    fn scope(&self, name: Option<&str>, prefix: &str) -> String {
        match name {
            Some(name) => self.graph.unique_scope(name),
            None => {
                let auto = self.graph.next_layer_name(prefix);
                self.graph.unique_scope(&auto)
            }
        }
    }

    fn map(&self, scope: &str, op_type: &str, rows: Dim, cols: Dim, channels: usize) -> SymbolicTensor {
        self.graph.add_tensor(scope, op_type, vec![None, rows, cols, Some(channels)])
    }

    /// Input placeholder, named `input_N:0`
    pub fn input(&self, shape: InputShape) -> SymbolicTensor {
        let scope = self.scope(None, "input");
        self.map(&scope, "", shape.rows, shape.cols, shape.channels)
    }

    pub fn conv2d(
        &self,
        x: &SymbolicTensor,
        name: Option<&str>,
        filters: usize,
        kernel: (usize, usize),
        config: ConvConfig,
    ) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "conv2d");
        let (rows, cols, _) = feature_map(&scope, x)?;
        let rows = window_out(&scope, rows, kernel.0, config.strides.0, config.padding)?;
        let cols = window_out(&scope, cols, kernel.1, config.strides.1, config.padding)?;
        let op = config.op_type("Conv2D");
        Ok(self.map(&scope, op, rows, cols, filters))
    }

    pub fn depthwise_conv2d(
        &self,
        x: &SymbolicTensor,
        name: Option<&str>,
        kernel: (usize, usize),
        depth_multiplier: usize,
        config: ConvConfig,
    ) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "depthwise_conv2d");
        let (rows, cols, channels) = feature_map(&scope, x)?;
        let rows = window_out(&scope, rows, kernel.0, config.strides.0, config.padding)?;
        let cols = window_out(&scope, cols, kernel.1, config.strides.1, config.padding)?;
        let op = config.op_type("depthwise");
        let channels = channels
            .checked_mul(depth_multiplier)
            .ok_or_else(|| overflow(&scope, format!("{channels} channels times {depth_multiplier}")))?;
        Ok(self.map(&scope, op, rows, cols, channels))
    }

    pub fn separable_conv2d(
        &self,
        x: &SymbolicTensor,
        name: Option<&str>,
        filters: usize,
        kernel: (usize, usize),
        config: ConvConfig,
    ) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "separable_conv2d");
        let (rows, cols, _) = feature_map(&scope, x)?;
        let rows = window_out(&scope, rows, kernel.0, config.strides.0, config.padding)?;
        let cols = window_out(&scope, cols, kernel.1, config.strides.1, config.padding)?;
        let op = config.op_type("separable_conv2d");
        Ok(self.map(&scope, op, rows, cols, filters))
    }

    pub fn batch_norm(&self, x: &SymbolicTensor, name: Option<&str>) -> SymbolicTensor {
        let scope = self.scope(name, "batch_normalization");
        self.graph.add_tensor(&scope, "FusedBatchNorm", x.shape().to_vec())
    }

    pub fn activation(
        &self,
        x: &SymbolicTensor,
        name: Option<&str>,
        activation: Activation,
    ) -> SymbolicTensor {
        let scope = self.scope(name, "activation");
        self.graph.add_tensor(&scope, activation.op_type(), x.shape().to_vec())
    }

    /// Zero padding as `((top, bottom), (left, right))`
    pub fn zero_padding(
        &self,
        x: &SymbolicTensor,
        name: Option<&str>,
        padding: ((usize, usize), (usize, usize)),
    ) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "zero_padding2d");
        let (rows, cols, channels) = feature_map(&scope, x)?;
        let ((top, bottom), (left, right)) = padding;
        let rows = padded(&scope, rows, top, bottom)?;
        let cols = padded(&scope, cols, left, right)?;
        Ok(self.map(&scope, "Pad", rows, cols, channels))
    }

    fn pool(
        &self,
        x: &SymbolicTensor,
        scope: String,
        op: &str,
        pool: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<SymbolicTensor> {
        let (rows, cols, channels) = feature_map(&scope, x)?;
        let rows = window_out(&scope, rows, pool.0, strides.0, padding)?;
        let cols = window_out(&scope, cols, pool.1, strides.1, padding)?;
        Ok(self.map(&scope, op, rows, cols, channels))
    }

    pub fn max_pool(
        &self,
        x: &SymbolicTensor,
        name: Option<&str>,
        pool: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "max_pooling2d");
        self.pool(x, scope, "MaxPool", pool, strides, padding)
    }

    pub fn avg_pool(
        &self,
        x: &SymbolicTensor,
        name: Option<&str>,
        pool: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "average_pooling2d");
        self.pool(x, scope, "AvgPool", pool, strides, padding)
    }

    pub fn global_avg_pool(&self, x: &SymbolicTensor, name: Option<&str>) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "global_average_pooling2d");
        let (_, _, channels) = feature_map(&scope, x)?;
        Ok(self.graph.add_tensor(&scope, "Mean", vec![None, Some(channels)]))
    }

    pub fn global_max_pool(&self, x: &SymbolicTensor, name: Option<&str>) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "global_max_pooling2d");
        let (_, _, channels) = feature_map(&scope, x)?;
        Ok(self.graph.add_tensor(&scope, "Max", vec![None, Some(channels)]))
    }

    /// Channel concatenation of feature maps with matching spatial size
    pub fn concat(&self, xs: &[&SymbolicTensor], name: Option<&str>) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "concatenate");
        let (first, rest) = xs.split_first().ok_or_else(|| VisionError::InvalidShape {
            layer: scope.clone(),
            reason: "nothing to concatenate".to_string(),
        })?;
        let (rows, cols, mut channels) = feature_map(&scope, first)?;
        for x in rest {
            let (r, c, ch) = feature_map(&scope, x)?;
            if r != rows || c != cols {
                return Err(VisionError::InvalidShape {
                    layer: scope,
                    reason: format!("spatial mismatch between {} and {}", first, x),
                });
            }
            channels = channels
                .checked_add(ch)
                .ok_or_else(|| overflow(&scope, format!("concatenating {ch} channels onto {channels}")))?;
        }
        Ok(self.map(&scope, "concat", rows, cols, channels))
    }

    /// Element-wise sum of tensors with identical shapes
    pub fn add(&self, xs: &[&SymbolicTensor], name: Option<&str>) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "add");
        let first = xs.first().ok_or_else(|| VisionError::InvalidShape {
            layer: scope.clone(),
            reason: "nothing to add".to_string(),
        })?;
        if let Some(other) = xs.iter().find(|x| x.shape() != first.shape()) {
            return Err(VisionError::InvalidShape {
                layer: scope,
                reason: format!("shape mismatch between {} and {}", first, other),
            });
        }
        Ok(self.graph.add_tensor(&scope, "add", first.shape().to_vec()))
    }

    pub fn flatten(&self, x: &SymbolicTensor, name: Option<&str>) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "flatten");
        match element_count(&scope, x)? {
            Some(units) => Ok(self.graph.add_tensor(&scope, "Reshape", vec![None, Some(units)])),
            None => Err(VisionError::InvalidShape {
                layer: scope,
                reason: format!("cannot flatten {} with unknown dimensions", x),
            }),
        }
    }

    pub fn dense(
        &self,
        x: &SymbolicTensor,
        name: Option<&str>,
        units: usize,
        activation: Option<Activation>,
    ) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "dense");
        if x.rank() != 2 {
            return Err(VisionError::InvalidShape {
                layer: scope,
                reason: format!("dense layers take rank-2 inputs, got {}", x),
            });
        }
        let op = activation.map_or("BiasAdd", Activation::op_type);
        Ok(self.graph.add_tensor(&scope, op, vec![None, Some(units)]))
    }

    /// Inference-time dropout, an identity op
    pub fn dropout(&self, x: &SymbolicTensor, name: Option<&str>) -> SymbolicTensor {
        let scope = self.scope(name, "dropout");
        self.graph.add_tensor(&scope, "Identity", x.shape().to_vec())
    }

    pub fn reshape(&self, x: &SymbolicTensor, name: Option<&str>, dims: &[usize]) -> Result<SymbolicTensor> {
        let scope = self.scope(name, "reshape");
        let known = element_count(&scope, x)?;
        let target = dims
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d))
            .ok_or_else(|| overflow(&scope, format!("target shape {dims:?}")))?;
        if known.is_some_and(|known| known != target) {
            return Err(VisionError::InvalidShape {
                layer: scope,
                reason: format!("cannot reshape {} into {:?}", x, dims),
            });
        }
        let mut shape = vec![None];
        shape.extend(dims.iter().map(|d| Some(*d)));
        Ok(self.graph.add_tensor(&scope, "Reshape", shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder_with_input(size: usize) -> (Graph, InputShape) {
        (Graph::new(), InputShape::square(size))
    }

    #[test]
    fn test_conv_output_sizes() {
        let (graph, shape) = builder_with_input(224);
        let b = GraphBuilder::new(&graph);
        let x = b.input(shape);
        assert_eq!(x.name(), "input_1:0");

        let same = ConvConfig { strides: (2, 2), padding: Padding::Same, ..Default::default() };
        let y = b.conv2d(&x, Some("conv1"), 64, (7, 7), same).unwrap();
        assert_eq!(y.shape(), &[None, Some(112), Some(112), Some(64)]);
        assert_eq!(y.name(), "conv1/BiasAdd:0");

        let valid = ConvConfig { bias: false, ..Default::default() };
        let z = b.conv2d(&y, None, 32, (3, 3), valid).unwrap();
        assert_eq!(z.shape(), &[None, Some(110), Some(110), Some(32)]);
        assert_eq!(z.name(), "conv2d_1/Conv2D:0");
    }

    #[test]
    fn test_valid_window_larger_than_input_fails() {
        let (graph, shape) = builder_with_input(2);
        let b = GraphBuilder::new(&graph);
        let x = b.input(shape);
        let err = b.max_pool(&x, Some("pool"), (3, 3), (2, 2), Padding::Valid).unwrap_err();
        assert!(matches!(err, VisionError::InvalidShape { ref layer, .. } if layer == "pool"));
    }

    #[test]
    fn test_unknown_dims_propagate() {
        let graph = Graph::new();
        let b = GraphBuilder::new(&graph);
        let x = b.input(InputShape::dynamic(3));
        let y = b.conv2d(&x, None, 8, (3, 3), ConvConfig::default()).unwrap();
        assert_eq!(y.shape(), &[None, None, None, Some(8)]);
        assert!(b.flatten(&y, None).is_err());
        let pooled = b.global_avg_pool(&y, None).unwrap();
        assert_eq!(pooled.shape(), &[None, Some(8)]);
    }

    #[test]
    fn test_concat_sums_channels() {
        let (graph, shape) = builder_with_input(8);
        let b = GraphBuilder::new(&graph);
        let x = b.input(shape);
        let c = b.concat(&[&x, &x], Some("mixed0")).unwrap();
        assert_eq!(c.channels(), Some(6));
        assert_eq!(c.name(), "mixed0/concat:0");
    }

    #[test]
    fn test_dense_requires_flat_input() {
        let (graph, shape) = builder_with_input(4);
        let b = GraphBuilder::new(&graph);
        let x = b.input(shape);
        assert!(b.dense(&x, None, 10, None).is_err());
        let flat = b.flatten(&x, None).unwrap();
        let out = b.dense(&flat, Some("predictions"), 10, Some(Activation::Softmax)).unwrap();
        assert_eq!(out.name(), "predictions/Softmax:0");
        assert_eq!(out.shape(), &[None, Some(10)]);
    }

    #[test]
    fn test_oversized_shapes_are_rejected() {
        let graph = Graph::new();
        let b = GraphBuilder::new(&graph);
        let x = b.input(InputShape::new(1 << 40, 1 << 40, 512));

        let err = b.flatten(&x, Some("flatten")).unwrap_err();
        assert!(matches!(err, VisionError::InvalidShape { ref layer, .. } if layer == "flatten"));

        let err = b.reshape(&x, Some("reshape"), &[1 << 40, 1 << 40, 512]).unwrap_err();
        assert!(matches!(err, VisionError::InvalidShape { ref layer, .. } if layer == "reshape"));

        let edge = b.input(InputShape::new(usize::MAX, 8, 3));
        let err = b.zero_padding(&edge, Some("pad"), ((1, 1), (1, 1))).unwrap_err();
        assert!(matches!(err, VisionError::InvalidShape { ref layer, .. } if layer == "pad"));
    }
}
