//! Rasterizing the indices with the JIT kernel.

pub mod kernel;

pub use super::*;
pub use crate::backend::jit::{FloatElement, IntElement, JitBackend, JitRuntime};

use burn::tensor::TensorPrimitive;
use burn_jit::kernel::into_contiguous;
use std::mem::size_of;

/// Running one pass with the JIT kernel.
pub fn rasterize_indices<R: JitRuntime, F: FloatElement, I: IntElement>(
    input: RasterizeIndicesInput<JitBackend<R, F, I>>,
    pass: Pass<JitBackend<R, F, I>>,
    options: &RasterizeIndicesOptions,
) -> Result<RasterizeIndicesOutput<JitBackend<R, F, I>>, Error> {
    // The kernel addresses 32-bit elements
    if size_of::<F>() != 4 || size_of::<I>() != 4 {
        return Err(Error::Validation(
            format!("The element sizes ({}, {})", size_of::<F>(), size_of::<I>()),
            "4 bytes".into(),
        ));
    }

    // Specifying the arguments

    let layout = input.layout(options.tile_size)?;
    pass.validate(&layout)?;
    let config = LaunchConfig::new(layout, &DeviceLimits::WGPU)?;
    let device = input.device();
    // T'
    let isect_count = input.flatten_ids.dims()[0] as u32;
    let is_writing = pass.is_writing();

    #[cfg(debug_assertions)]
    log::debug!(
        target: "gausplat::indexer::jit",
        "rasterize_indices ({pass:?}) with shared memory ({})",
        config.shared_memory_size_readable(),
    );

    // Specifying the inputs

    let (chunk_starts, index_count) = match pass {
        Pass::Count => (None, 0),
        Pass::Write {
            chunk_starts,
            index_count,
        } => (Some(into_contiguous(chunk_starts.into_primitive())), index_count),
    };

    let inputs = kernel::rasterize_indices::Inputs {
        means_2d: into_contiguous(input.means_2d.into_primitive().tensor()),
        conics: into_contiguous(input.conics.into_primitive().tensor()),
        opacities: into_contiguous(input.opacities.into_primitive().tensor()),
        transmittances: into_contiguous(
            input.transmittances.into_primitive().tensor(),
        ),
        tile_offsets: into_contiguous(input.tile_offsets.into_primitive()),
        flatten_ids: into_contiguous(input.flatten_ids.into_primitive()),
        chunk_starts,
    };

    // Launching the kernel

    let outputs = kernel::rasterize_indices::main::<R, F, I>(
        &config,
        kernel::rasterize_indices::Arguments {
            image_count: layout.image_count,
            image_size_x: layout.image_size_x,
            image_size_y: layout.image_size_y,
            point_count: layout.point_count,
            tile_count_x: layout.tile_count_x,
            tile_count_y: layout.tile_count_y,
            isect_count,
            range_start: options.range_start,
            range_end: options.range_end,
            is_writing: is_writing as u32,
        },
        inputs,
        index_count,
    );

    let contributions = if !is_writing {
        Contributions::Counts {
            chunk_counts: Tensor::from_primitive(outputs.chunk_counts),
        }
    } else if index_count == 0 {
        // No pixel has any contribution
        Contributions::Indices {
            gaussian_ids: Tensor::empty([0], &device),
            pixel_ids: Tensor::empty([0], &device),
        }
    } else {
        Contributions::Indices {
            gaussian_ids: Tensor::from_primitive(outputs.gaussian_ids),
            pixel_ids: Tensor::from_primitive(outputs.pixel_ids),
        }
    };

    Ok(RasterizeIndicesOutput {
        contributions,
        transmittances: Tensor::from_primitive(TensorPrimitive::Float(
            outputs.transmittances,
        )),
    })
}

impl<R: JitRuntime, F: FloatElement, I: IntElement> IndicesRasterizer
    for JitBackend<R, F, I>
{
    fn rasterize_indices(
        input: RasterizeIndicesInput<Self>,
        pass: Pass<Self>,
        options: &RasterizeIndicesOptions,
    ) -> Result<RasterizeIndicesOutput<Self>, Error> {
        rasterize_indices(input, pass, options)
    }
}
