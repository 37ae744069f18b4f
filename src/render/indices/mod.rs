//! Rasterizing the points into per-pixel index lists.
//!
//! For each pixel, the output lists the points that visibly contribute to it
//! during front-to-back alpha compositing, in compositing order.
//! It is computed in two passes:
//!
//! 1. [`Pass::Count`] produces the contribution count of each pixel.
//! 2. [`Pass::Write`] scatters `(point, pixel)` pairs at the offsets obtained
//!    by scanning the counts exclusively.
//!
//! [`rasterize_to_indices_in_range`] runs both passes for a batch range,
//! and [`IndexSteps`] walks all the batch ranges.

pub mod cpu;
pub mod jit;
pub mod launch;
pub mod layout;
pub mod protocol;

#[cfg(test)]
pub(crate) mod fixture;

pub use crate::{
    backend::{Backend, NdArray},
    error::Error,
    preset::render::*,
};
pub use burn::{
    config::Config,
    tensor::{Int, Tensor, TensorData},
};
pub use launch::*;
pub use layout::*;
pub use protocol::*;

use std::fmt;

pub trait IndicesRasterizer: Backend {
    /// Rasterizing the points to the contributions of each pixel in one pass.
    fn rasterize_indices(
        input: RasterizeIndicesInput<Self>,
        pass: Pass<Self>,
        options: &RasterizeIndicesOptions,
    ) -> Result<RasterizeIndicesOutput<Self>, Error>;
}

#[derive(Config, Debug, PartialEq)]
pub struct RasterizeIndicesOptions {
    #[config(default = "0")]
    /// The first batch of each tile to process.
    pub range_start: u32,

    #[config(default = "u32::MAX")]
    /// The batch of each tile to stop before.
    ///
    /// It is clamped to the batch count of the tile.
    pub range_end: u32,

    #[config(default = "TILE_SIZE")]
    /// `T`
    pub tile_size: u32,
}

#[derive(Clone)]
pub struct RasterizeIndicesInput<B: Backend> {
    /// `[I, N, 2]`
    pub means_2d: Tensor<B, 3>,
    /// `[I, N, 3]`
    pub conics: Tensor<B, 3>,
    /// `[I, N]`
    pub opacities: Tensor<B, 2>,
    /// `[I, I_y, I_x]`
    pub transmittances: Tensor<B, 3>,
    /// `[I, I_y / T, I_x / T]`
    pub tile_offsets: Tensor<B, 3, Int>,
    /// `[T']`
    ///
    /// The point indices are in `[0, I * N)`.
    pub flatten_ids: Tensor<B, 1, Int>,
}

/// The mode of a pass.
#[derive(Clone)]
pub enum Pass<B: Backend> {
    /// Counting the contributions of each pixel.
    Count,
    /// Writing the contributions of each pixel.
    Write {
        /// `[I, I_y, I_x]`
        ///
        /// The exclusive scan of the counts from [`Pass::Count`].
        chunk_starts: Tensor<B, 3, Int>,
        /// The total of the counts from [`Pass::Count`].
        index_count: usize,
    },
}

#[derive(Clone)]
pub enum Contributions<B: Backend> {
    Counts {
        /// `[I, I_y, I_x]`
        chunk_counts: Tensor<B, 3, Int>,
    },
    Indices {
        /// `[T'']`, the point indices in `[0, N)`.
        gaussian_ids: Tensor<B, 1, Int>,
        /// `[T'']`, the pixel indices in `[0, I * I_y * I_x)`.
        pixel_ids: Tensor<B, 1, Int>,
    },
}

#[derive(Clone)]
pub struct RasterizeIndicesOutput<B: Backend> {
    pub contributions: Contributions<B>,
    /// `[I, I_y, I_x]`
    ///
    /// The residual transmittances after the processed batches.
    /// They should be the input of the next batch range.
    pub transmittances: Tensor<B, 3>,
}

impl<B: Backend> RasterizeIndicesInput<B> {
    /// Validating the dimensions and returning the layout.
    pub fn layout(
        &self,
        tile_size: u32,
    ) -> Result<Layout, Error> {
        let [image_count, point_count, _] = self.means_2d.dims();
        let [_, image_size_y, image_size_x] = self.transmittances.dims();

        let layout = Layout::new(
            image_count as u32,
            image_size_x as u32,
            image_size_y as u32,
            point_count as u32,
            tile_size,
        )?;

        let dims_target = [
            (
                "means_2d.dims()",
                self.means_2d.dims().to_vec(),
                vec![image_count, point_count, 2],
            ),
            (
                "conics.dims()",
                self.conics.dims().to_vec(),
                vec![image_count, point_count, 3],
            ),
            (
                "opacities.dims()",
                self.opacities.dims().to_vec(),
                vec![image_count, point_count],
            ),
            (
                "transmittances.dims()",
                self.transmittances.dims().to_vec(),
                vec![image_count, image_size_y, image_size_x],
            ),
            (
                "tile_offsets.dims()",
                self.tile_offsets.dims().to_vec(),
                vec![
                    image_count,
                    layout.tile_count_y as usize,
                    layout.tile_count_x as usize,
                ],
            ),
        ];
        for (name, dims, target) in dims_target {
            if dims != target {
                return Err(Error::Validation(
                    format!("{name} ({dims:?})"),
                    format!("{target:?}"),
                ));
            }
        }

        Ok(layout)
    }

    pub fn device(&self) -> B::Device {
        self.means_2d.device()
    }
}

impl<B: Backend> Pass<B> {
    #[inline]
    pub const fn is_writing(&self) -> bool {
        matches!(self, Self::Write { .. })
    }

    /// Validating the dimensions against the layout.
    pub fn validate(
        &self,
        layout: &Layout,
    ) -> Result<(), Error> {
        let Self::Write { chunk_starts, .. } = self else {
            return Ok(());
        };

        let dims = chunk_starts.dims();
        let target = [
            layout.image_count as usize,
            layout.image_size_y as usize,
            layout.image_size_x as usize,
        ];
        if dims != target {
            return Err(Error::Validation(
                format!("chunk_starts.dims() ({dims:?})"),
                format!("{target:?}"),
            ));
        }

        Ok(())
    }
}

impl<B: Backend> Contributions<B> {
    /// `[I, I_y, I_x]`
    pub fn into_counts(self) -> Option<Tensor<B, 3, Int>> {
        match self {
            Self::Counts { chunk_counts } => Some(chunk_counts),
            Self::Indices { .. } => None,
        }
    }

    /// `([T''], [T''])`
    pub fn into_indices(self) -> Option<(Tensor<B, 1, Int>, Tensor<B, 1, Int>)> {
        match self {
            Self::Counts { .. } => None,
            Self::Indices {
                gaussian_ids,
                pixel_ids,
            } => Some((gaussian_ids, pixel_ids)),
        }
    }
}

impl Default for RasterizeIndicesOptions {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl IndicesRasterizer for NdArray {
    fn rasterize_indices(
        input: RasterizeIndicesInput<Self>,
        pass: Pass<Self>,
        options: &RasterizeIndicesOptions,
    ) -> Result<RasterizeIndicesOutput<Self>, Error> {
        cpu::rasterize_indices(input, pass, options)
    }
}

impl<B: Backend> fmt::Debug for RasterizeIndicesInput<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("RasterizeIndicesInput<{}>", B::name()))
            .field("means_2d.dims()", &self.means_2d.dims())
            .field("conics.dims()", &self.conics.dims())
            .field("opacities.dims()", &self.opacities.dims())
            .field("transmittances.dims()", &self.transmittances.dims())
            .field("tile_offsets.dims()", &self.tile_offsets.dims())
            .field("flatten_ids.dims()", &self.flatten_ids.dims())
            .finish()
    }
}

impl<B: Backend> fmt::Debug for Pass<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Count => f.write_str("Count"),
            Self::Write {
                chunk_starts,
                index_count,
            } => f
                .debug_struct("Write")
                .field("chunk_starts.dims()", &chunk_starts.dims())
                .field("index_count", index_count)
                .finish(),
        }
    }
}

impl<B: Backend> fmt::Debug for RasterizeIndicesOutput<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut f =
            f.debug_struct(&format!("RasterizeIndicesOutput<{}>", B::name()));
        match &self.contributions {
            Contributions::Counts { chunk_counts } => {
                f.field("chunk_counts.dims()", &chunk_counts.dims());
            },
            Contributions::Indices {
                gaussian_ids,
                pixel_ids,
            } => {
                f.field("gaussian_ids.dims()", &gaussian_ids.dims());
                f.field("pixel_ids.dims()", &pixel_ids.dims());
            },
        }
        f.field("transmittances.dims()", &self.transmittances.dims())
            .finish()
    }
}
