//! DenseNet121, DenseNet169 and DenseNet201

use crate::builder::{Activation, ConvConfig, GraphBuilder, Padding};
use crate::graph::SymbolicTensor;
use crate::validation::ResolvedConfig;

use super::{pool_features, Result};

const GROWTH_RATE: usize = 32;
const REDUCTION: f64 = 0.5;

fn bn_relu(b: &GraphBuilder<'_>, x: &SymbolicTensor, name: &str) -> SymbolicTensor {
    let x = b.batch_norm(x, Some(&format!("{name}_bn")));
    b.activation(&x, Some(&format!("{name}_relu")), Activation::Relu)
}

/// One composite layer whose output is concatenated onto its input
fn conv_block(b: &GraphBuilder<'_>, x: &SymbolicTensor, name: &str) -> Result<SymbolicTensor> {
    let no_bias = ConvConfig { bias: false, ..Default::default() };

    let y = bn_relu(b, x, &format!("{name}_0"));
    let y = b.conv2d(&y, Some(&format!("{name}_1_conv")), 4 * GROWTH_RATE, (1, 1), no_bias)?;
    let y = bn_relu(b, &y, &format!("{name}_1"));
    let same = ConvConfig { padding: Padding::Same, ..no_bias };
    let y = b.conv2d(&y, Some(&format!("{name}_2_conv")), GROWTH_RATE, (3, 3), same)?;
    b.concat(&[x, &y], Some(&format!("{name}_concat")))
}

fn dense_block(b: &GraphBuilder<'_>, x: &SymbolicTensor, blocks: usize, name: &str) -> Result<SymbolicTensor> {
    let mut x = x.clone();
    for i in 1..=blocks {
        x = conv_block(b, &x, &format!("{name}_block{i}"))?;
    }
    Ok(x)
}

fn transition_block(b: &GraphBuilder<'_>, x: &SymbolicTensor, name: &str) -> Result<SymbolicTensor> {
    let channels = x.channels().unwrap_or_default();
    let filters = (channels as f64 * REDUCTION) as usize;
    let x = bn_relu(b, x, name);
    let x = b.conv2d(&x, Some(&format!("{name}_conv")), filters, (1, 1), ConvConfig { bias: false, ..Default::default() })?;
    b.avg_pool(&x, Some(&format!("{name}_pool")), (2, 2), (2, 2), Padding::Valid)
}

pub(super) fn build(
    b: &GraphBuilder<'_>,
    input: &SymbolicTensor,
    config: &ResolvedConfig,
    blocks: [usize; 4],
) -> Result<SymbolicTensor> {
    let x = b.zero_padding(input, None, ((3, 3), (3, 3)))?;
    let stem = ConvConfig { strides: (2, 2), bias: false, ..Default::default() };
    let x = b.conv2d(&x, Some("conv1/conv"), 64, (7, 7), stem)?;
    let x = b.batch_norm(&x, Some("conv1/bn"));
    let x = b.activation(&x, Some("conv1/relu"), Activation::Relu);
    let x = b.zero_padding(&x, None, ((1, 1), (1, 1)))?;
    let mut x = b.max_pool(&x, Some("pool1"), (3, 3), (2, 2), Padding::Valid)?;

    for (i, &count) in blocks.iter().enumerate() {
        let stage = i + 2;
        x = dense_block(b, &x, count, &format!("conv{stage}"))?;
        if i + 1 < blocks.len() {
            x = transition_block(b, &x, &format!("pool{stage}"))?;
        }
    }

    let x = b.batch_norm(&x, Some("bn"));
    let x = b.activation(&x, Some("relu"), Activation::Relu);

    if config.include_top {
        let x = b.global_avg_pool(&x, Some("avg_pool"))?;
        b.dense(&x, Some("fc1000"), config.classes, Some(Activation::Softmax))
    } else {
        pool_features(b, &x, config.pooling, Some(("avg_pool", "max_pool")))
    }
}
