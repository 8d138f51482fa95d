//! MobileNet v2
//!
//! Inverted residual blocks `block_N_*` with linear bottlenecks. Channel
//! counts are scaled by `alpha` and rounded to multiples of eight.

use crate::builder::{Activation, ConvConfig, GraphBuilder, Padding};
use crate::graph::SymbolicTensor;
use crate::validation::ResolvedConfig;

use super::Result;

/// `(filters, stride, expansion)` of blocks 0 to 16
const BLOCKS: [(usize, usize, usize); 17] = [
    (16, 1, 1),
    (24, 2, 6),
    (24, 1, 6),
    (32, 2, 6),
    (32, 1, 6),
    (32, 1, 6),
    (64, 2, 6),
    (64, 1, 6),
    (64, 1, 6),
    (64, 1, 6),
    (96, 1, 6),
    (96, 1, 6),
    (96, 1, 6),
    (160, 2, 6),
    (160, 1, 6),
    (160, 1, 6),
    (320, 1, 6),
];

/// Round `v` to the nearest multiple of `divisor`, never dropping more than
/// 10% below `v`
fn make_divisible(v: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let mut rounded = (((v + d / 2.0) as usize) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * v {
        rounded += divisor;
    }
    rounded
}

/// Padding that makes a stride-2 valid 3x3 window cover the input like
/// `same` padding does
fn correct_pad(x: &SymbolicTensor) -> ((usize, usize), (usize, usize)) {
    let adjust = |d: Option<usize>| d.map_or(1, |d| 1 - d % 2);
    let shape = x.shape();
    ((1 - adjust(shape[1]), 1), (1 - adjust(shape[2]), 1))
}

fn inverted_res_block(
    b: &GraphBuilder<'_>,
    inputs: &SymbolicTensor,
    (filters, stride, expansion): (usize, usize, usize),
    alpha: f64,
    block_id: usize,
) -> Result<SymbolicTensor> {
    let in_channels = inputs.channels().unwrap_or_default();
    let pointwise_filters = make_divisible((filters as f64 * alpha).trunc(), 8);
    let no_bias = ConvConfig { padding: Padding::Same, bias: false, ..Default::default() };

    let mut x = inputs.clone();
    let prefix = if block_id > 0 {
        let prefix = format!("block_{block_id}_");
        x = b.conv2d(&x, Some(&format!("{prefix}expand")), expansion * in_channels, (1, 1), no_bias)?;
        x = b.batch_norm(&x, Some(&format!("{prefix}expand_BN")));
        x = b.activation(&x, Some(&format!("{prefix}expand_relu")), Activation::Relu6);
        prefix
    } else {
        "expanded_conv_".to_string()
    };

    let depthwise = if stride == 2 {
        x = b.zero_padding(&x, Some(&format!("{prefix}pad")), correct_pad(&x))?;
        ConvConfig { strides: (2, 2), padding: Padding::Valid, ..no_bias }
    } else {
        no_bias
    };
    x = b.depthwise_conv2d(&x, Some(&format!("{prefix}depthwise")), (3, 3), 1, depthwise)?;
    x = b.batch_norm(&x, Some(&format!("{prefix}depthwise_BN")));
    x = b.activation(&x, Some(&format!("{prefix}depthwise_relu")), Activation::Relu6);

    x = b.conv2d(&x, Some(&format!("{prefix}project")), pointwise_filters, (1, 1), no_bias)?;
    x = b.batch_norm(&x, Some(&format!("{prefix}project_BN")));

    if in_channels == pointwise_filters && stride == 1 {
        return b.add(&[inputs, &x], Some(&format!("{prefix}add")));
    }
    Ok(x)
}

pub(super) fn build(b: &GraphBuilder<'_>, input: &SymbolicTensor, config: &ResolvedConfig) -> Result<SymbolicTensor> {
    let alpha = config.alpha;

    let x = b.zero_padding(input, Some("Conv1_pad"), correct_pad(input))?;
    let stem = ConvConfig { strides: (2, 2), bias: false, ..Default::default() };
    let x = b.conv2d(&x, Some("Conv1"), make_divisible(32.0 * alpha, 8), (3, 3), stem)?;
    let x = b.batch_norm(&x, Some("bn_Conv1"));
    let mut x = b.activation(&x, Some("Conv1_relu"), Activation::Relu6);

    for (block_id, block) in BLOCKS.into_iter().enumerate() {
        x = inverted_res_block(b, &x, block, alpha, block_id)?;
    }

    let last_filters = if alpha > 1.0 { make_divisible(1280.0 * alpha, 8) } else { 1280 };
    let conv = ConvConfig { bias: false, ..Default::default() };
    let x = b.conv2d(&x, Some("Conv_1"), last_filters, (1, 1), conv)?;
    let x = b.batch_norm(&x, Some("Conv_1_bn"));
    let x = b.activation(&x, Some("out_relu"), Activation::Relu6);

    if config.include_top {
        let x = b.global_avg_pool(&x, None)?;
        b.dense(&x, Some("Logits"), config.classes, Some(Activation::Softmax))
    } else {
        super::pool_features(b, &x, config.pooling, None)
    }
}
