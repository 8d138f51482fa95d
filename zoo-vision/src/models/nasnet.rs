//! NASNet-A Large and Mobile
//!
//! A stem convolution, two stem reduction cells and three stacks of normal
//! cells separated by reduction cells. Each cell takes the previous two
//! cell outputs; the older one is first adjusted to the shape of the newer.
//! Cells concatenate their branches into `normal_concat_<id>` and
//! `reduction_concat_<id>`.

use crate::builder::{Activation, ConvConfig, GraphBuilder, Padding};
use crate::graph::SymbolicTensor;
use crate::validation::ResolvedConfig;

use super::{classifier_head, Result};

const FILTER_MULTIPLIER: usize = 2;

/// Hyperparameters distinguishing the two published variants
#[derive(Debug, Clone, Copy)]
pub(super) struct NasNetConfig {
    penultimate_filters: usize,
    num_blocks: usize,
    stem_block_filters: usize,
    skip_reduction: bool,
}

impl NasNetConfig {
    pub(super) fn large() -> Self {
        Self { penultimate_filters: 4032, num_blocks: 6, stem_block_filters: 96, skip_reduction: true }
    }

    pub(super) fn mobile() -> Self {
        Self { penultimate_filters: 1056, num_blocks: 4, stem_block_filters: 32, skip_reduction: false }
    }
}

fn conv1x1(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    name: &str,
    bn_name: &str,
    filters: usize,
) -> Result<SymbolicTensor> {
    let conv = ConvConfig { padding: Padding::Same, bias: false, ..Default::default() };
    let x = b.conv2d(x, Some(name), filters, (1, 1), conv)?;
    Ok(b.batch_norm(&x, Some(bn_name)))
}

/// ReLU, separable convolution and batch norm, twice
fn separable_block(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    filters: usize,
    kernel: usize,
    strides: usize,
    block_id: &str,
) -> Result<SymbolicTensor> {
    let first = ConvConfig { strides: (strides, strides), padding: Padding::Same, bias: false, activation: None };
    let second = ConvConfig { strides: (1, 1), ..first };

    let x = b.activation(x, None, Activation::Relu);
    let x = b.separable_conv2d(&x, Some(&format!("separable_conv_1_{block_id}")), filters, (kernel, kernel), first)?;
    let x = b.batch_norm(&x, Some(&format!("separable_conv_1_bn_{block_id}")));
    let x = b.activation(&x, None, Activation::Relu);
    let x = b.separable_conv2d(&x, Some(&format!("separable_conv_2_{block_id}")), filters, (kernel, kernel), second)?;
    Ok(b.batch_norm(&x, Some(&format!("separable_conv_2_bn_{block_id}"))))
}

/// Bring the previous cell output `p` to the spatial size and width of `ip`
fn adjust_block(
    b: &GraphBuilder<'_>,
    p: Option<&SymbolicTensor>,
    ip: &SymbolicTensor,
    filters: usize,
    block_id: &str,
) -> Result<SymbolicTensor> {
    let Some(p) = p else { return Ok(ip.clone()) };

    if p.shape()[1] != ip.shape()[1] {
        let x = b.activation(p, Some(&format!("adjust_relu_1_{block_id}")), Activation::Relu);
        let x = b.avg_pool(&x, Some(&format!("adjust_avg_pool_1_{block_id}")), (1, 1), (2, 2), Padding::Valid)?;
        let name = format!("adjust_conv_1_{block_id}");
        return conv1x1(b, &x, &name, &format!("adjust_bn_{block_id}"), filters);
    }
    if p.channels() != Some(filters) {
        let x = b.activation(p, Some(&format!("adjust_relu_1_{block_id}")), Activation::Relu);
        let name = format!("adjust_conv_projection_{block_id}");
        return conv1x1(b, &x, &name, &format!("adjust_bn_{block_id}"), filters);
    }
    Ok(p.clone())
}

/// Normal cell; returns the cell output and its input, which becomes the
/// next cell's `p`
fn normal_cell(
    b: &GraphBuilder<'_>,
    ip: &SymbolicTensor,
    p: Option<&SymbolicTensor>,
    filters: usize,
    block_id: &str,
) -> Result<(SymbolicTensor, SymbolicTensor)> {
    let p = adjust_block(b, p, ip, filters, block_id)?;
    let h = b.activation(ip, None, Activation::Relu);
    let h = conv1x1(b, &h, &format!("normal_conv_1_{block_id}"), &format!("normal_bn_1_{block_id}"), filters)?;

    let left = separable_block(b, &h, filters, 5, 1, &format!("normal_left1_{block_id}"))?;
    let right = separable_block(b, &p, filters, 3, 1, &format!("normal_right1_{block_id}"))?;
    let x1 = b.add(&[&left, &right], Some(&format!("normal_add_1_{block_id}")))?;

    let left = separable_block(b, &p, filters, 5, 1, &format!("normal_left2_{block_id}"))?;
    let right = separable_block(b, &p, filters, 3, 1, &format!("normal_right2_{block_id}"))?;
    let x2 = b.add(&[&left, &right], Some(&format!("normal_add_2_{block_id}")))?;

    let left = b.avg_pool(&h, Some(&format!("normal_left3_{block_id}")), (3, 3), (1, 1), Padding::Same)?;
    let x3 = b.add(&[&left, &p], Some(&format!("normal_add_3_{block_id}")))?;

    let left = b.avg_pool(&p, Some(&format!("normal_left4_{block_id}")), (3, 3), (1, 1), Padding::Same)?;
    let right = b.avg_pool(&p, Some(&format!("normal_right4_{block_id}")), (3, 3), (1, 1), Padding::Same)?;
    let x4 = b.add(&[&left, &right], Some(&format!("normal_add_4_{block_id}")))?;

    let left = separable_block(b, &h, filters, 3, 1, &format!("normal_left5_{block_id}"))?;
    let x5 = b.add(&[&left, &h], Some(&format!("normal_add_5_{block_id}")))?;

    let x = b.concat(&[&p, &x1, &x2, &x3, &x4, &x5], Some(&format!("normal_concat_{block_id}")))?;
    Ok((x, ip.clone()))
}

/// Reduction cell halving the spatial size
fn reduction_cell(
    b: &GraphBuilder<'_>,
    ip: &SymbolicTensor,
    p: Option<&SymbolicTensor>,
    filters: usize,
    block_id: &str,
) -> Result<(SymbolicTensor, SymbolicTensor)> {
    let p = adjust_block(b, p, ip, filters, block_id)?;
    let h = b.activation(ip, None, Activation::Relu);
    let h = conv1x1(b, &h, &format!("reduction_conv_1_{block_id}"), &format!("reduction_bn_1_{block_id}"), filters)?;

    let left = separable_block(b, &h, filters, 5, 2, &format!("reduction_left1_{block_id}"))?;
    let right = separable_block(b, &p, filters, 7, 2, &format!("reduction_right1_{block_id}"))?;
    let x1 = b.add(&[&left, &right], Some(&format!("reduction_add_1_{block_id}")))?;

    let left = b.max_pool(&h, Some(&format!("reduction_left2_{block_id}")), (3, 3), (2, 2), Padding::Same)?;
    let right = separable_block(b, &p, filters, 7, 2, &format!("reduction_right2_{block_id}"))?;
    let x2 = b.add(&[&left, &right], Some(&format!("reduction_add_2_{block_id}")))?;

    let left = b.avg_pool(&h, Some(&format!("reduction_left3_{block_id}")), (3, 3), (2, 2), Padding::Same)?;
    let right = separable_block(b, &p, filters, 5, 2, &format!("reduction_right3_{block_id}"))?;
    let x3 = b.add(&[&left, &right], Some(&format!("reduction_add3_{block_id}")))?;

    let left = b.avg_pool(&x1, Some(&format!("reduction_left4_{block_id}")), (3, 3), (1, 1), Padding::Same)?;
    let x4 = b.add(&[&x2, &left], None)?;

    let left = separable_block(b, &x1, filters, 3, 1, &format!("reduction_left5_{block_id}"))?;
    let right = b.max_pool(&h, Some(&format!("reduction_right5_{block_id}")), (3, 3), (2, 2), Padding::Same)?;
    let x5 = b.add(&[&left, &right], Some(&format!("reduction_add4_{block_id}")))?;

    let x = b.concat(&[&x2, &x3, &x4, &x5], Some(&format!("reduction_concat_{block_id}")))?;
    Ok((x, ip.clone()))
}

pub(super) fn build(
    b: &GraphBuilder<'_>,
    input: &SymbolicTensor,
    config: &ResolvedConfig,
    nasnet: NasNetConfig,
) -> Result<SymbolicTensor> {
    let filters = nasnet.penultimate_filters / 24;
    let blocks = nasnet.num_blocks;

    let stem = ConvConfig { strides: (2, 2), bias: false, ..Default::default() };
    let x = b.conv2d(input, Some("stem_conv1"), nasnet.stem_block_filters, (3, 3), stem)?;
    let x = b.batch_norm(&x, Some("stem_bn1"));

    let (x, p) = reduction_cell(b, &x, None, filters / FILTER_MULTIPLIER.pow(2), "stem_1")?;
    let (mut x, mut p) = reduction_cell(b, &x, Some(&p), filters / FILTER_MULTIPLIER, "stem_2")?;

    for stack in 0..3 {
        let width = filters * FILTER_MULTIPLIER.pow(stack as u32);
        if stack > 0 {
            let id = format!("reduce_{}", stack * blocks);
            let (reduced, p0) = reduction_cell(b, &x, Some(&p), width, &id)?;
            x = reduced;
            if !nasnet.skip_reduction {
                p = p0;
            }
        }
        for i in 0..blocks {
            let id = if stack == 0 { i } else { stack * blocks + i + 1 };
            let (next, previous) = normal_cell(b, &x, Some(&p), width, &id.to_string())?;
            x = next;
            p = previous;
        }
    }

    let x = b.activation(&x, None, Activation::Relu);
    classifier_head(b, &x, config, None, "predictions")
}
