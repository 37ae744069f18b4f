pub use super::*;
pub use bytemuck::{Pod, Zeroable};

use burn::tensor::ops::{FloatTensorOps, IntTensorOps};
use bytemuck::bytes_of;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Arguments {
    /// `I`
    pub image_count: u32,
    /// `I_x`
    pub image_size_x: u32,
    /// `I_y`
    pub image_size_y: u32,
    /// `N`
    pub point_count: u32,

    /// `I_x / T`
    pub tile_count_x: u32,
    /// `I_y / T`
    pub tile_count_y: u32,
    /// `T'`
    pub isect_count: u32,

    pub range_start: u32,
    pub range_end: u32,
    /// `0` for counting and `1` for writing.
    pub is_writing: u32,
}

#[derive(Clone, Debug)]
pub struct Inputs<R: JitRuntime, F: FloatElement, I: IntElement> {
    /// `[I, N, 2]`
    pub means_2d: JitTensor<R, F>,
    /// `[I, N, 3]`
    pub conics: JitTensor<R, F>,
    /// `[I, N]`
    pub opacities: JitTensor<R, F>,
    /// `[I, I_y, I_x]`
    pub transmittances: JitTensor<R, F>,
    /// `[I, I_y / T, I_x / T]`
    pub tile_offsets: JitTensor<R, I>,
    /// `[T']`
    pub flatten_ids: JitTensor<R, I>,
    /// `[I, I_y, I_x]`, only for writing.
    pub chunk_starts: Option<JitTensor<R, I>>,
}

#[derive(Clone, Debug)]
pub struct Outputs<R: JitRuntime, F: FloatElement, I: IntElement> {
    /// `[I, I_y, I_x]`, or `[1]` for writing.
    pub chunk_counts: JitTensor<R, I>,
    /// `[T'']`, or `[1]` for counting.
    pub gaussian_ids: JitTensor<R, I>,
    /// `[T'']`, or `[1]` for counting.
    pub pixel_ids: JitTensor<R, I>,
    /// `[I, I_y, I_x]`
    pub transmittances: JitTensor<R, F>,
}

/// The kernel specialized for a tile size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Kernel {
    /// `T`
    pub tile_size: u32,
}

impl KernelSource for Kernel {
    fn source(&self) -> SourceTemplate {
        SourceTemplate::new(include_str!("kernel.wgsl"))
            .register("tile_size", self.tile_size.to_string())
            .register("alpha_max", format!("{ALPHA_MAX:?}"))
            .register("alpha_min", format!("{ALPHA_MIN:?}"))
            .register("transmittance_min", format!("{TRANSMITTANCE_MIN:?}"))
    }

    fn id(&self) -> KernelId {
        KernelId::new::<Self>().info(self.tile_size)
    }
}

/// Rasterizing the point indices to the pixels.
///
/// The buffers unused by the mode are bound to one-element placeholders.
pub fn main<R: JitRuntime, F: FloatElement, I: IntElement>(
    config: &LaunchConfig,
    arguments: Arguments,
    inputs: Inputs<R, F, I>,
    index_count: usize,
) -> Outputs<R, F, I> {
    // Specifying the parameters

    let client = &inputs.means_2d.client;
    let device = &inputs.means_2d.device;
    let [group_dim_x, group_dim_y, group_dim_z] = config.group_dim;
    let [group_count_x, group_count_y, group_count_z] = config.group_count;
    // [I, I_y, I_x]
    let shape = [
        arguments.image_count as usize,
        arguments.image_size_y as usize,
        arguments.image_size_x as usize,
    ];
    let is_writing = arguments.is_writing != 0;

    let placeholder = || JitBackend::<R, F, I>::int_empty([1].into(), device);

    // [I, I_y, I_x]
    let chunk_starts = inputs.chunk_starts.unwrap_or_else(placeholder);
    // [I, I_y, I_x]
    let chunk_counts = if is_writing {
        placeholder()
    } else {
        JitBackend::<R, F, I>::int_empty(shape.into(), device)
    };
    // [T'']
    let gaussian_ids = if is_writing {
        JitBackend::<R, F, I>::int_empty([index_count.max(1)].into(), device)
    } else {
        placeholder()
    };
    // [T'']
    let pixel_ids = if is_writing {
        JitBackend::<R, F, I>::int_empty([index_count.max(1)].into(), device)
    } else {
        placeholder()
    };
    // [I, I_y, I_x]
    let transmittances = JitBackend::<R, F, I>::float_empty(shape.into(), device);

    // Launching the kernel

    client.execute(
        Box::new(SourceKernel::new(
            Kernel {
                tile_size: config.layout.tile_size,
            },
            CubeDim {
                x: group_dim_x,
                y: group_dim_y,
                z: group_dim_z,
            },
        )),
        CubeCount::Static(group_count_x, group_count_y, group_count_z),
        vec![
            client.create(bytes_of(&arguments)).binding(),
            inputs.means_2d.handle.binding(),
            inputs.conics.handle.binding(),
            inputs.opacities.handle.binding(),
            inputs.transmittances.handle.binding(),
            inputs.tile_offsets.handle.binding(),
            inputs.flatten_ids.handle.binding(),
            chunk_starts.handle.binding(),
            chunk_counts.handle.to_owned().binding(),
            gaussian_ids.handle.to_owned().binding(),
            pixel_ids.handle.to_owned().binding(),
            transmittances.handle.to_owned().binding(),
        ],
    );

    Outputs {
        chunk_counts,
        gaussian_ids,
        pixel_ids,
        transmittances,
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn kernel_source_is_specialized() {
        use super::*;

        let kernel = Kernel { tile_size: 8 };
        let source = kernel.source().complete();

        assert!(source.contains("const TILE_SIZE: u32 = 8u;"), "{source}");
        assert!(source.contains("const ALPHA_MAX: f32 = 0.999;"), "{source}");
        assert!(
            source.contains(&format!(
                "const TRANSMITTANCE_MIN: f32 = {TRANSMITTANCE_MIN:?};"
            )),
            "{source}"
        );
        assert!(
            source.contains("!(sigma >= 0.0 && alpha_raw >= ALPHA_MIN)"),
            "{source}"
        );
        assert!(!source.contains("{{"), "{source}");
        assert_ne!(kernel.id(), Kernel { tile_size: 16 }.id());
        assert_eq!(kernel.id(), Kernel { tile_size: 8 }.id());
    }
}
