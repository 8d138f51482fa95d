//! Inception-ResNet v2

use crate::builder::{Activation, ConvConfig, GraphBuilder, Padding};
use crate::graph::SymbolicTensor;
use crate::validation::ResolvedConfig;

use super::{classifier_head, Result};

#[derive(Debug, Clone, Copy)]
enum BlockType {
    Block35,
    Block17,
    Block8,
}

impl BlockType {
    fn prefix(self) -> &'static str {
        match self {
            BlockType::Block35 => "block35",
            BlockType::Block17 => "block17",
            BlockType::Block8 => "block8",
        }
    }
}

/// Convolution with batch norm and ReLU. Named units name their parts
/// `<name>_bn` and `<name>_ac`.
fn conv_bn(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    filters: usize,
    kernel: (usize, usize),
    strides: usize,
    padding: Padding,
    name: Option<&str>,
) -> Result<SymbolicTensor> {
    let conv = ConvConfig { strides: (strides, strides), padding, bias: false, activation: None };
    let x = b.conv2d(x, name, filters, kernel, conv)?;
    let bn_name = name.map(|n| format!("{n}_bn"));
    let x = b.batch_norm(&x, bn_name.as_deref());
    let ac_name = name.map(|n| format!("{n}_ac"));
    Ok(b.activation(&x, ac_name.as_deref(), Activation::Relu))
}

fn same(b: &GraphBuilder<'_>, x: &SymbolicTensor, filters: usize, kernel: (usize, usize)) -> Result<SymbolicTensor> {
    conv_bn(b, x, filters, kernel, 1, Padding::Same, None)
}

fn reduce(b: &GraphBuilder<'_>, x: &SymbolicTensor, filters: usize) -> Result<SymbolicTensor> {
    conv_bn(b, x, filters, (3, 3), 2, Padding::Valid, None)
}

/// Residual inception block: branches are concatenated, projected back to
/// the input width by a biased 1x1 convolution and added to the input.
fn residual_block(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    block_type: BlockType,
    index: usize,
    activate: bool,
) -> Result<SymbolicTensor> {
    let branches = match block_type {
        BlockType::Block35 => {
            let branch_0 = same(b, x, 32, (1, 1))?;
            let branch_1 = same(b, x, 32, (1, 1))?;
            let branch_1 = same(b, &branch_1, 32, (3, 3))?;
            let branch_2 = same(b, x, 32, (1, 1))?;
            let branch_2 = same(b, &branch_2, 48, (3, 3))?;
            let branch_2 = same(b, &branch_2, 64, (3, 3))?;
            vec![branch_0, branch_1, branch_2]
        }
        BlockType::Block17 => {
            let branch_0 = same(b, x, 192, (1, 1))?;
            let branch_1 = same(b, x, 128, (1, 1))?;
            let branch_1 = same(b, &branch_1, 160, (1, 7))?;
            let branch_1 = same(b, &branch_1, 192, (7, 1))?;
            vec![branch_0, branch_1]
        }
        BlockType::Block8 => {
            let branch_0 = same(b, x, 192, (1, 1))?;
            let branch_1 = same(b, x, 192, (1, 1))?;
            let branch_1 = same(b, &branch_1, 224, (1, 3))?;
            let branch_1 = same(b, &branch_1, 256, (3, 1))?;
            vec![branch_0, branch_1]
        }
    };

    let name = format!("{}_{index}", block_type.prefix());
    let refs: Vec<&SymbolicTensor> = branches.iter().collect();
    let mixed = b.concat(&refs, Some(&format!("{name}_mixed")))?;
    let width = x.channels().unwrap_or_default();
    let up = b.conv2d(&mixed, Some(&format!("{name}_conv")), width, (1, 1), ConvConfig::default())?;

    let x = b.add(&[x, &up], Some(&name))?;
    if activate {
        Ok(b.activation(&x, Some(&format!("{name}_ac")), Activation::Relu))
    } else {
        Ok(x)
    }
}

pub(super) fn build(b: &GraphBuilder<'_>, input: &SymbolicTensor, config: &ResolvedConfig) -> Result<SymbolicTensor> {
    let x = reduce(b, input, 32)?;
    let x = conv_bn(b, &x, 32, (3, 3), 1, Padding::Valid, None)?;
    let x = same(b, &x, 64, (3, 3))?;
    let x = b.max_pool(&x, None, (3, 3), (2, 2), Padding::Valid)?;
    let x = conv_bn(b, &x, 80, (1, 1), 1, Padding::Valid, None)?;
    let x = conv_bn(b, &x, 192, (3, 3), 1, Padding::Valid, None)?;
    let x = b.max_pool(&x, None, (3, 3), (2, 2), Padding::Valid)?;

    // mixed_5b: 35x35x320
    let branch_0 = same(b, &x, 96, (1, 1))?;
    let branch_1 = same(b, &x, 48, (1, 1))?;
    let branch_1 = same(b, &branch_1, 64, (5, 5))?;
    let branch_2 = same(b, &x, 64, (1, 1))?;
    let branch_2 = same(b, &branch_2, 96, (3, 3))?;
    let branch_2 = same(b, &branch_2, 96, (3, 3))?;
    let branch_pool = b.avg_pool(&x, None, (3, 3), (1, 1), Padding::Same)?;
    let branch_pool = same(b, &branch_pool, 64, (1, 1))?;
    let mut x = b.concat(&[&branch_0, &branch_1, &branch_2, &branch_pool], Some("mixed_5b"))?;

    for index in 1..=10 {
        x = residual_block(b, &x, BlockType::Block35, index, true)?;
    }

    // mixed_6a: 17x17x1088
    let branch_0 = reduce(b, &x, 384)?;
    let branch_1 = same(b, &x, 256, (1, 1))?;
    let branch_1 = same(b, &branch_1, 256, (3, 3))?;
    let branch_1 = reduce(b, &branch_1, 384)?;
    let branch_pool = b.max_pool(&x, None, (3, 3), (2, 2), Padding::Valid)?;
    let mut x = b.concat(&[&branch_0, &branch_1, &branch_pool], Some("mixed_6a"))?;

    for index in 1..=20 {
        x = residual_block(b, &x, BlockType::Block17, index, true)?;
    }

    // mixed_7a: 8x8x2080
    let branch_0 = same(b, &x, 256, (1, 1))?;
    let branch_0 = reduce(b, &branch_0, 384)?;
    let branch_1 = same(b, &x, 256, (1, 1))?;
    let branch_1 = reduce(b, &branch_1, 288)?;
    let branch_2 = same(b, &x, 256, (1, 1))?;
    let branch_2 = same(b, &branch_2, 288, (3, 3))?;
    let branch_2 = reduce(b, &branch_2, 320)?;
    let branch_pool = b.max_pool(&x, None, (3, 3), (2, 2), Padding::Valid)?;
    let mut x = b.concat(&[&branch_0, &branch_1, &branch_2, &branch_pool], Some("mixed_7a"))?;

    for index in 1..=9 {
        x = residual_block(b, &x, BlockType::Block8, index, true)?;
    }
    let x = residual_block(b, &x, BlockType::Block8, 10, false)?;

    let x = conv_bn(b, &x, 1536, (1, 1), 1, Padding::Same, Some("conv_7b"))?;

    classifier_head(b, &x, config, Some("avg_pool"), "predictions")
}
