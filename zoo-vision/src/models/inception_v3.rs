//! Inception v3
//!
//! Convolutions are unnamed `conv2d_bn` units (`conv2d_N`,
//! `batch_normalization_N`, `activation_N`); the inception modules are the
//! named concatenations `mixed0` to `mixed10`.

use crate::builder::{Activation, ConvConfig, GraphBuilder, Padding};
use crate::graph::SymbolicTensor;
use crate::validation::ResolvedConfig;

use super::{classifier_head, Result};

/// Unnamed convolution, batch norm and ReLU
fn conv_bn(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    filters: usize,
    kernel: (usize, usize),
    strides: usize,
    padding: Padding,
) -> Result<SymbolicTensor> {
    let conv = ConvConfig { strides: (strides, strides), padding, bias: false, activation: None };
    let x = b.conv2d(x, None, filters, kernel, conv)?;
    let x = b.batch_norm(&x, None);
    Ok(b.activation(&x, None, Activation::Relu))
}

fn same(b: &GraphBuilder<'_>, x: &SymbolicTensor, filters: usize, kernel: (usize, usize)) -> Result<SymbolicTensor> {
    conv_bn(b, x, filters, kernel, 1, Padding::Same)
}

fn reduce(b: &GraphBuilder<'_>, x: &SymbolicTensor, filters: usize) -> Result<SymbolicTensor> {
    conv_bn(b, x, filters, (3, 3), 2, Padding::Valid)
}

fn avg_branch(b: &GraphBuilder<'_>, x: &SymbolicTensor, filters: usize) -> Result<SymbolicTensor> {
    let pool = b.avg_pool(x, None, (3, 3), (1, 1), Padding::Same)?;
    same(b, &pool, filters, (1, 1))
}

/// 35x35 module with a 5x5 branch
fn module_a(b: &GraphBuilder<'_>, x: &SymbolicTensor, pool_filters: usize, name: &str) -> Result<SymbolicTensor> {
    let branch1x1 = same(b, x, 64, (1, 1))?;

    let branch5x5 = same(b, x, 48, (1, 1))?;
    let branch5x5 = same(b, &branch5x5, 64, (5, 5))?;

    let branch3x3dbl = same(b, x, 64, (1, 1))?;
    let branch3x3dbl = same(b, &branch3x3dbl, 96, (3, 3))?;
    let branch3x3dbl = same(b, &branch3x3dbl, 96, (3, 3))?;

    let branch_pool = avg_branch(b, x, pool_filters)?;
    b.concat(&[&branch1x1, &branch5x5, &branch3x3dbl, &branch_pool], Some(name))
}

/// 17x17 module with factorised 7x7 branches
fn module_c(b: &GraphBuilder<'_>, x: &SymbolicTensor, width: usize, name: &str) -> Result<SymbolicTensor> {
    let branch1x1 = same(b, x, 192, (1, 1))?;

    let branch7x7 = same(b, x, width, (1, 1))?;
    let branch7x7 = same(b, &branch7x7, width, (1, 7))?;
    let branch7x7 = same(b, &branch7x7, 192, (7, 1))?;

    let mut branch7x7dbl = same(b, x, width, (1, 1))?;
    for kernel in [(7, 1), (1, 7), (7, 1)] {
        branch7x7dbl = same(b, &branch7x7dbl, width, kernel)?;
    }
    let branch7x7dbl = same(b, &branch7x7dbl, 192, (1, 7))?;

    let branch_pool = avg_branch(b, x, 192)?;
    b.concat(&[&branch1x1, &branch7x7, &branch7x7dbl, &branch_pool], Some(name))
}

/// 8x8 module with split 1x3/3x1 branches
fn module_e(b: &GraphBuilder<'_>, x: &SymbolicTensor, index: usize) -> Result<SymbolicTensor> {
    let branch1x1 = same(b, x, 320, (1, 1))?;

    let branch3x3 = same(b, x, 384, (1, 1))?;
    let left = same(b, &branch3x3, 384, (1, 3))?;
    let right = same(b, &branch3x3, 384, (3, 1))?;
    let branch3x3 = b.concat(&[&left, &right], Some(&format!("mixed9_{index}")))?;

    let branch3x3dbl = same(b, x, 448, (1, 1))?;
    let branch3x3dbl = same(b, &branch3x3dbl, 384, (3, 3))?;
    let left = same(b, &branch3x3dbl, 384, (1, 3))?;
    let right = same(b, &branch3x3dbl, 384, (3, 1))?;
    let branch3x3dbl = b.concat(&[&left, &right], None)?;

    let branch_pool = avg_branch(b, x, 192)?;
    let name = format!("mixed{}", 9 + index);
    b.concat(&[&branch1x1, &branch3x3, &branch3x3dbl, &branch_pool], Some(&name))
}

pub(super) fn build(b: &GraphBuilder<'_>, input: &SymbolicTensor, config: &ResolvedConfig) -> Result<SymbolicTensor> {
    let x = reduce(b, input, 32)?;
    let x = conv_bn(b, &x, 32, (3, 3), 1, Padding::Valid)?;
    let x = same(b, &x, 64, (3, 3))?;
    let x = b.max_pool(&x, None, (3, 3), (2, 2), Padding::Valid)?;
    let x = conv_bn(b, &x, 80, (1, 1), 1, Padding::Valid)?;
    let x = conv_bn(b, &x, 192, (3, 3), 1, Padding::Valid)?;
    let x = b.max_pool(&x, None, (3, 3), (2, 2), Padding::Valid)?;

    let x = module_a(b, &x, 32, "mixed0")?;
    let x = module_a(b, &x, 64, "mixed1")?;
    let x = module_a(b, &x, 64, "mixed2")?;

    // mixed3: 35x35 -> 17x17
    let branch3x3 = reduce(b, &x, 384)?;
    let branch3x3dbl = same(b, &x, 64, (1, 1))?;
    let branch3x3dbl = same(b, &branch3x3dbl, 96, (3, 3))?;
    let branch3x3dbl = reduce(b, &branch3x3dbl, 96)?;
    let branch_pool = b.max_pool(&x, None, (3, 3), (2, 2), Padding::Valid)?;
    let x = b.concat(&[&branch3x3, &branch3x3dbl, &branch_pool], Some("mixed3"))?;

    let x = module_c(b, &x, 128, "mixed4")?;
    let x = module_c(b, &x, 160, "mixed5")?;
    let x = module_c(b, &x, 160, "mixed6")?;
    let x = module_c(b, &x, 192, "mixed7")?;

    // mixed8: 17x17 -> 8x8
    let branch3x3 = same(b, &x, 192, (1, 1))?;
    let branch3x3 = reduce(b, &branch3x3, 320)?;
    let mut branch7x7x3 = same(b, &x, 192, (1, 1))?;
    for kernel in [(1, 7), (7, 1)] {
        branch7x7x3 = same(b, &branch7x7x3, 192, kernel)?;
    }
    let branch7x7x3 = reduce(b, &branch7x7x3, 192)?;
    let branch_pool = b.max_pool(&x, None, (3, 3), (2, 2), Padding::Valid)?;
    let mut x = b.concat(&[&branch3x3, &branch7x7x3, &branch_pool], Some("mixed8"))?;

    for index in 0..2 {
        x = module_e(b, &x, index)?;
    }

    classifier_head(b, &x, config, Some("avg_pool"), "predictions")
}
