//! VGG16 and VGG19
//!
//! Five blocks of 3x3 convolutions, each closed by a 2x2 max pool. The
//! block sizes are `[2, 2, 3, 3, 3]` for VGG16 and `[2, 2, 4, 4, 4]` for
//! VGG19.

use crate::builder::{Activation, ConvConfig, GraphBuilder, Padding};
use crate::graph::SymbolicTensor;
use crate::validation::ResolvedConfig;

use super::{pool_features, Result};

const FILTERS: [usize; 5] = [64, 128, 256, 512, 512];

pub(super) fn build(
    b: &GraphBuilder<'_>,
    input: &SymbolicTensor,
    config: &ResolvedConfig,
    blocks: [usize; 5],
) -> Result<SymbolicTensor> {
    let conv = ConvConfig { padding: Padding::Same, activation: Some(Activation::Relu), ..Default::default() };

    let mut x = input.clone();
    for (block, (&convs, &filters)) in blocks.iter().zip(FILTERS.iter()).enumerate() {
        let block = block + 1;
        for i in 1..=convs {
            x = b.conv2d(&x, Some(&format!("block{block}_conv{i}")), filters, (3, 3), conv)?;
        }
        x = b.max_pool(&x, Some(&format!("block{block}_pool")), (2, 2), (2, 2), Padding::Valid)?;
    }

    if !config.include_top {
        return pool_features(b, &x, config.pooling, None);
    }
    let x = b.flatten(&x, Some("flatten"))?;
    let x = b.dense(&x, Some("fc1"), 4096, Some(Activation::Relu))?;
    let x = b.dense(&x, Some("fc2"), 4096, Some(Activation::Relu))?;
    b.dense(&x, Some("predictions"), config.classes, Some(Activation::Softmax))
}
