pub use burn::{
    backend::{
        ndarray::NdArrayDevice,
        wgpu::{WgpuDevice, WgpuRuntime},
        NdArray,
    },
    tensor::backend::Backend,
};

pub type Wgpu = burn_jit::JitBackend<WgpuRuntime, f32, i32>;

pub mod jit {
    pub use burn_jit::{FloatElement, IntElement, JitBackend, JitRuntime};
}
