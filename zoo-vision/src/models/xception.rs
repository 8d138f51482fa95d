//! Xception
//!
//! Entry flow with strided residual blocks, eight middle-flow blocks
//! (`block5` to `block12`) and the exit flow.

use crate::builder::{Activation, ConvConfig, GraphBuilder, Padding};
use crate::graph::SymbolicTensor;
use crate::validation::ResolvedConfig;

use super::{classifier_head, Result};

const SEPARABLE: ConvConfig = ConvConfig { strides: (1, 1), padding: Padding::Same, bias: false, activation: None };

fn sepconv_bn(b: &GraphBuilder<'_>, x: &SymbolicTensor, name: &str, filters: usize) -> Result<SymbolicTensor> {
    let x = b.separable_conv2d(x, Some(name), filters, (3, 3), SEPARABLE)?;
    Ok(b.batch_norm(&x, Some(&format!("{name}_bn"))))
}

fn relu(b: &GraphBuilder<'_>, x: &SymbolicTensor, name: &str) -> SymbolicTensor {
    b.activation(x, Some(&format!("{name}_act")), Activation::Relu)
}

/// Unnamed strided 1x1 projection used as the residual of a reduction block
fn shortcut(b: &GraphBuilder<'_>, x: &SymbolicTensor, filters: usize) -> Result<SymbolicTensor> {
    let conv = ConvConfig { strides: (2, 2), ..SEPARABLE };
    let residual = b.conv2d(x, None, filters, (1, 1), conv)?;
    Ok(b.batch_norm(&residual, None))
}

/// Two separable convolutions and a strided max pool, summed with a
/// projected residual
fn reduction_block(
    b: &GraphBuilder<'_>,
    x: &SymbolicTensor,
    block: usize,
    filters: (usize, usize),
    activate_input: bool,
) -> Result<SymbolicTensor> {
    let residual = shortcut(b, x, filters.1)?;
    let first = format!("block{block}_sepconv1");
    let second = format!("block{block}_sepconv2");

    let y = if activate_input { relu(b, x, &first) } else { x.clone() };
    let y = sepconv_bn(b, &y, &first, filters.0)?;
    let y = relu(b, &y, &second);
    let y = sepconv_bn(b, &y, &second, filters.1)?;
    let y = b.max_pool(&y, Some(&format!("block{block}_pool")), (3, 3), (2, 2), Padding::Same)?;
    b.add(&[&y, &residual], None)
}

fn middle_block(b: &GraphBuilder<'_>, x: &SymbolicTensor, block: usize) -> Result<SymbolicTensor> {
    let mut y = x.clone();
    for i in 1..=3 {
        let name = format!("block{block}_sepconv{i}");
        y = relu(b, &y, &name);
        y = sepconv_bn(b, &y, &name, 728)?;
    }
    b.add(&[&y, x], None)
}

pub(super) fn build(b: &GraphBuilder<'_>, input: &SymbolicTensor, config: &ResolvedConfig) -> Result<SymbolicTensor> {
    let stem = ConvConfig { strides: (2, 2), padding: Padding::Valid, bias: false, activation: None };
    let x = b.conv2d(input, Some("block1_conv1"), 32, (3, 3), stem)?;
    let x = b.batch_norm(&x, Some("block1_conv1_bn"));
    let x = relu(b, &x, "block1_conv1");
    let x = b.conv2d(&x, Some("block1_conv2"), 64, (3, 3), ConvConfig { bias: false, ..Default::default() })?;
    let x = b.batch_norm(&x, Some("block1_conv2_bn"));
    let x = relu(b, &x, "block1_conv2");

    let x = reduction_block(b, &x, 2, (128, 128), false)?;
    let x = reduction_block(b, &x, 3, (256, 256), true)?;
    let mut x = reduction_block(b, &x, 4, (728, 728), true)?;

    for block in 5..=12 {
        x = middle_block(b, &x, block)?;
    }

    let x = reduction_block(b, &x, 13, (728, 1024), true)?;

    let x = sepconv_bn(b, &x, "block14_sepconv1", 1536)?;
    let x = relu(b, &x, "block14_sepconv1");
    let x = sepconv_bn(b, &x, "block14_sepconv2", 2048)?;
    let x = relu(b, &x, "block14_sepconv2");

    classifier_head(b, &x, config, Some("avg_pool"), "predictions")
}
