//! ResNet50
//!
//! Bottleneck residual network with stages of `[3, 4, 6, 3]` blocks. Layers
//! follow the Caffe naming (`res2a_branch2a`, `bn2a_branch2a`); activations
//! and merges are left unnamed, so the last activation of a fresh graph is
//! `activation_49`.

use crate::builder::{Activation, ConvConfig, GraphBuilder, Padding};
use crate::graph::SymbolicTensor;
use crate::validation::ResolvedConfig;

use super::{classifier_head, Result};

const STAGES: [(usize, [usize; 3]); 4] =
    [(3, [64, 64, 256]), (4, [128, 128, 512]), (6, [256, 256, 1024]), (3, [512, 512, 2048])];

fn conv_bn(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    base: &str,
    filters: usize,
    kernel: usize,
    conv: ConvConfig,
) -> Result<SymbolicTensor> {
    let x = b.conv2d(x, Some(&format!("res{base}")), filters, (kernel, kernel), conv)?;
    Ok(b.batch_norm(&x, Some(&format!("bn{base}"))))
}

/// Bottleneck block; `strides` is `Some` for the projection block opening a
/// stage.
fn bottleneck(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    stage: usize,
    block: char,
    filters: [usize; 3],
    strides: Option<usize>,
) -> Result<SymbolicTensor> {
    let [f1, f2, f3] = filters;
    let base = format!("{stage}{block}_branch");
    let first = ConvConfig { strides: strides.map_or((1, 1), |s| (s, s)), ..Default::default() };
    let same = ConvConfig { padding: Padding::Same, ..Default::default() };

    let y = conv_bn(b, x, &format!("{base}2a"), f1, 1, first)?;
    let y = b.activation(&y, None, Activation::Relu);
    let y = conv_bn(b, &y, &format!("{base}2b"), f2, 3, same)?;
    let y = b.activation(&y, None, Activation::Relu);
    let y = conv_bn(b, &y, &format!("{base}2c"), f3, 1, ConvConfig::default())?;

    let shortcut = match strides {
        Some(_) => conv_bn(b, x, &format!("{base}1"), f3, 1, first)?,
        None => x.clone(),
    };
    let y = b.add(&[&y, &shortcut], None)?;
    Ok(b.activation(&y, None, Activation::Relu))
}

pub(super) fn build(b: &GraphBuilder<'_>, input: &SymbolicTensor, config: &ResolvedConfig) -> Result<SymbolicTensor> {
    let x = b.zero_padding(input, Some("conv1_pad"), ((3, 3), (3, 3)))?;
    let x = b.conv2d(&x, Some("conv1"), 64, (7, 7), ConvConfig { strides: (2, 2), ..Default::default() })?;
    let x = b.batch_norm(&x, Some("bn_conv1"));
    let x = b.activation(&x, None, Activation::Relu);
    let x = b.zero_padding(&x, Some("pool1_pad"), ((1, 1), (1, 1)))?;
    let mut x = b.max_pool(&x, None, (3, 3), (2, 2), Padding::Valid)?;

    for (i, (blocks, filters)) in STAGES.into_iter().enumerate() {
        let stage = i + 2;
        let strides = if stage == 2 { 1 } else { 2 };
        for (block, id) in ('a'..).zip(0..blocks) {
            let projection = (id == 0).then_some(strides);
            x = bottleneck(b, &x, stage, block, filters, projection)?;
        }
    }

    classifier_head(b, &x, config, Some("avg_pool"), "fc1000")
}
