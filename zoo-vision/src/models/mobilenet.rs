//! MobileNet v1
//!
//! Depthwise separable blocks `conv_dw_N` / `conv_pw_N` with ReLU6; widths
//! scale with `alpha` and the depthwise layers with `depth_multiplier`.

use crate::builder::{Activation, ConvConfig, GraphBuilder, Padding};
use crate::graph::SymbolicTensor;
use crate::validation::ResolvedConfig;

use super::{pool_features, Result};

/// `(pointwise filters, stride)` of blocks 1 to 13
const BLOCKS: [(usize, usize); 13] = [
    (64, 1),
    (128, 2),
    (128, 1),
    (256, 2),
    (256, 1),
    (512, 2),
    (512, 1),
    (512, 1),
    (512, 1),
    (512, 1),
    (512, 1),
    (1024, 2),
    (1024, 1),
];

fn scaled(filters: usize, alpha: f64) -> usize {
    (filters as f64 * alpha) as usize
}

fn depthwise_block(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    filters: usize,
    stride: usize,
    block_id: usize,
    depth_multiplier: usize,
) -> Result<SymbolicTensor> {
    let (x, padding) = if stride == 1 {
        (x.clone(), Padding::Same)
    } else {
        (b.zero_padding(x, Some(&format!("conv_pad_{block_id}")), ((0, 1), (0, 1)))?, Padding::Valid)
    };
    let dw = ConvConfig { strides: (stride, stride), padding, bias: false, activation: None };
    let x = b.depthwise_conv2d(&x, Some(&format!("conv_dw_{block_id}")), (3, 3), depth_multiplier, dw)?;
    let x = b.batch_norm(&x, Some(&format!("conv_dw_{block_id}_bn")));
    let x = b.activation(&x, Some(&format!("conv_dw_{block_id}_relu")), Activation::Relu6);

    let pw = ConvConfig { padding: Padding::Same, bias: false, ..Default::default() };
    let x = b.conv2d(&x, Some(&format!("conv_pw_{block_id}")), filters, (1, 1), pw)?;
    let x = b.batch_norm(&x, Some(&format!("conv_pw_{block_id}_bn")));
    Ok(b.activation(&x, Some(&format!("conv_pw_{block_id}_relu")), Activation::Relu6))
}

pub(super) fn build(b: &GraphBuilder<'_>, input: &SymbolicTensor, config: &ResolvedConfig) -> Result<SymbolicTensor> {
    let alpha = config.alpha;

    let x = b.zero_padding(input, Some("conv1_pad"), ((0, 1), (0, 1)))?;
    let stem = ConvConfig { strides: (2, 2), bias: false, ..Default::default() };
    let x = b.conv2d(&x, Some("conv1"), scaled(32, alpha), (3, 3), stem)?;
    let x = b.batch_norm(&x, Some("conv1_bn"));
    let mut x = b.activation(&x, Some("conv1_relu"), Activation::Relu6);

    for (i, (filters, stride)) in BLOCKS.into_iter().enumerate() {
        x = depthwise_block(b, &x, scaled(filters, alpha), stride, i + 1, config.depth_multiplier)?;
    }

    if !config.include_top {
        return pool_features(b, &x, config.pooling, None);
    }

    let width = scaled(1024, alpha);
    let x = b.global_avg_pool(&x, None)?;
    let x = b.reshape(&x, Some("reshape_1"), &[1, 1, width])?;
    let x = b.dropout(&x, Some("dropout"));
    let preds = ConvConfig { padding: Padding::Same, ..Default::default() };
    let x = b.conv2d(&x, Some("conv_preds"), config.classes, (1, 1), preds)?;
    let x = b.activation(&x, Some("act_softmax"), Activation::Softmax);
    b.reshape(&x, Some("reshape_2"), &[config.classes])
}
