//! JIT kernels.

pub mod rasterize_indices;

pub use super::*;
pub use burn_jit::{
    cubecl::KernelId,
    template::{KernelSource, SourceTemplate},
    tensor::JitTensor,
};

use burn_jit::{
    cubecl::{CubeCount, CubeDim},
    template::SourceKernel,
};
