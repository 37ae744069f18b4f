//! Rasterizing the indices on the host.
//!
//! Each group of `T * T` work-items covers one tile of one image.
//! Groups run in parallel, while the work-items of a group advance in lockstep:
//! every item loads one point of the batch into the shared batch,
//! the group synchronizes, and then every item scans the shared batch.

pub use super::*;

use burn::tensor::TensorPrimitive;
use rayon::prelude::*;

/// The host inputs of one pass.
#[derive(Clone, Copy, Debug)]
pub struct Inputs<'a> {
    /// `[I, N, 2]`
    pub means_2d: &'a [f32],
    /// `[I, N, 3]`
    pub conics: &'a [f32],
    /// `[I, N]`
    pub opacities: &'a [f32],
    /// `[I, I_y, I_x]`
    pub transmittances: &'a [f32],
    /// `[I, I_y / T, I_x / T]`
    pub tile_offsets: &'a [u32],
    /// `[T']`
    pub flatten_ids: &'a [u32],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode<'a> {
    Count,
    Write {
        /// `[I, I_y, I_x]`
        chunk_starts: &'a [u32],
        /// `T''`
        index_count: usize,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Contributions {
    Counts {
        /// `[I, I_y, I_x]`
        chunk_counts: Vec<u32>,
    },
    Indices {
        /// `[T'']`
        gaussian_ids: Vec<u32>,
        /// `[T'']`
        pixel_ids: Vec<u32>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outputs {
    pub contributions: Contributions,
    /// `[I, I_y, I_x]`
    pub transmittances: Vec<f32>,
}

/// The points of a batch cached for the whole group.
///
/// It is overwritten every batch.
#[derive(Clone, Debug)]
struct SharedBatch {
    /// `[T * T]`
    point_indices: Vec<u32>,
    /// `[T * T, 3]`
    positions_2d_opacities: Vec<[f32; 3]>,
    /// `[T * T, 3]`
    conics: Vec<[f32; 3]>,
}

#[derive(Clone, Copy, Debug)]
struct WorkItem {
    /// `None` if the pixel is outside the image.
    pixel_id: Option<u32>,
    /// The center of the pixel.
    position: [f32; 2],
    transmittance: f32,
    count: u32,
    chunk_start: u32,
    is_done: bool,
}

#[derive(Clone, Debug, Default)]
struct GroupOutput {
    /// `(pixel_id, count, transmittance)`
    pixels: Vec<(u32, u32, f32)>,
    /// `(offset, gaussian_id, pixel_id)`
    indices: Vec<(u32, u32, u32)>,
}

/// Running one pass on the host.
///
/// It processes the batches in `range_start..range_end` of each tile.
pub fn main(
    config: &LaunchConfig,
    range_start: u32,
    range_end: u32,
    inputs: Inputs<'_>,
    mode: Mode<'_>,
) -> Outputs {
    let layout = &config.layout;

    #[cfg(debug_assertions)]
    log::debug!(
        target: "gausplat::indexer::cpu",
        "main (is_writing: {}) with {} groups in batches [{range_start}, {range_end})",
        matches!(mode, Mode::Write { .. }),
        layout.tile_count(),
    );

    let point_count = layout.image_count as usize * layout.point_count as usize;
    debug_assert_eq!(inputs.means_2d.len(), point_count * 2);
    debug_assert_eq!(inputs.conics.len(), point_count * 3);
    debug_assert_eq!(inputs.opacities.len(), point_count);
    debug_assert_eq!(inputs.transmittances.len(), layout.pixel_count());
    debug_assert_eq!(inputs.tile_offsets.len(), layout.tile_count());

    let group_outputs = (0..layout.tile_count() as u32)
        .into_par_iter()
        .map(|tile_id| {
            rasterize_group(layout, range_start, range_end, &inputs, &mode, tile_id)
        })
        .collect::<Vec<_>>();

    // Scattering the group outputs, each slot is owned by exactly one item

    let mut transmittances = inputs.transmittances.to_vec();
    let contributions = match mode {
        Mode::Count => {
            let mut chunk_counts = vec![0; layout.pixel_count()];
            for output in &group_outputs {
                for &(pixel_id, count, transmittance) in &output.pixels {
                    chunk_counts[pixel_id as usize] = count;
                    transmittances[pixel_id as usize] = transmittance;
                }
            }
            Contributions::Counts { chunk_counts }
        },
        Mode::Write { index_count, .. } => {
            let mut gaussian_ids = vec![0; index_count];
            let mut pixel_ids = vec![0; index_count];
            for output in &group_outputs {
                for &(pixel_id, _, transmittance) in &output.pixels {
                    transmittances[pixel_id as usize] = transmittance;
                }
                for &(offset, gaussian_id, pixel_id) in &output.indices {
                    debug_assert!(
                        (offset as usize) < index_count,
                        "The chunk starts should be the exclusive scan of the counts",
                    );
                    if let (Some(g), Some(p)) = (
                        gaussian_ids.get_mut(offset as usize),
                        pixel_ids.get_mut(offset as usize),
                    ) {
                        *g = gaussian_id;
                        *p = pixel_id;
                    }
                }
            }
            Contributions::Indices {
                gaussian_ids,
                pixel_ids,
            }
        },
    };

    Outputs {
        contributions,
        transmittances,
    }
}

fn rasterize_group(
    layout: &Layout,
    range_start: u32,
    range_end: u32,
    inputs: &Inputs<'_>,
    mode: &Mode<'_>,
    tile_id: u32,
) -> GroupOutput {
    let batch_size = layout.batch_size();
    let (image_id, tile_y, tile_x) = layout.tile_position(tile_id);

    // Specifying the work-items

    let mut items = (0..batch_size)
        .map(|rank| {
            let (pixel_y, pixel_x) =
                layout.pixel_position(tile_y, tile_x, rank);
            let position = [pixel_x as f32 + 0.5, pixel_y as f32 + 0.5];

            if !layout.contains(pixel_y, pixel_x) {
                return WorkItem {
                    pixel_id: None,
                    position,
                    transmittance: 1.0,
                    count: 0,
                    chunk_start: 0,
                    is_done: true,
                };
            }

            let pixel_id = layout.pixel_id(image_id, pixel_y, pixel_x);
            let transmittance = inputs.transmittances[pixel_id as usize];
            let chunk_start = match mode {
                Mode::Count => 0,
                Mode::Write { chunk_starts, .. } => {
                    chunk_starts[pixel_id as usize]
                },
            };

            WorkItem {
                pixel_id: Some(pixel_id),
                position,
                transmittance,
                count: 0,
                chunk_start,
                is_done: transmittance <= TRANSMITTANCE_MIN,
            }
        })
        .collect::<Vec<_>>();

    let tile_range = layout.tile_range(
        inputs.tile_offsets,
        inputs.flatten_ids.len() as u32,
        tile_id,
    );
    let batch_count = tile_range.batch_count(batch_size);
    let mut output = GroupOutput::default();

    // Skipping the batches processed in the previous ranges
    if range_start < batch_count {
        let mut batch = SharedBatch::new(batch_size as usize);
        let mut active_count = items.iter().filter(|item| !item.is_done).count();

        for batch_index in range_start..range_end.min(batch_count) {
            // Exiting if all the items in the group are done
            if active_count == 0 {
                break;
            }

            // Loading phase, each item loads at most one point

            let isect_range = tile_range.batch(batch_index, batch_size);
            for (rank, isect_id) in isect_range.to_owned().enumerate() {
                batch.load(rank, inputs, inputs.flatten_ids[isect_id as usize]);
            }

            // Synchronized, then scanning phase

            let batch_len = isect_range.len();
            for item in items.iter_mut().filter(|item| !item.is_done) {
                let Some(pixel_id) = item.pixel_id else {
                    continue;
                };

                for rank in 0..batch_len {
                    let Some(alpha) = batch.alpha(rank, item.position) else {
                        continue;
                    };

                    let transmittance_next = item.transmittance * (1.0 - alpha);
                    // The point closing the pixel is excluded
                    if transmittance_next <= TRANSMITTANCE_MIN {
                        item.transmittance = transmittance_next;
                        item.is_done = true;
                        active_count -= 1;
                        break;
                    }

                    if let Mode::Write { .. } = mode {
                        output.indices.push((
                            item.chunk_start + item.count,
                            batch.point_indices[rank] % layout.point_count,
                            pixel_id,
                        ));
                    }
                    item.count += 1;
                    item.transmittance = transmittance_next;
                }
            }
        }
    }

    output.pixels = items
        .iter()
        .filter_map(|item| {
            item.pixel_id
                .map(|pixel_id| (pixel_id, item.count, item.transmittance))
        })
        .collect();

    output
}

impl SharedBatch {
    fn new(batch_size: usize) -> Self {
        Self {
            point_indices: vec![0; batch_size],
            positions_2d_opacities: vec![[0.0; 3]; batch_size],
            conics: vec![[0.0; 3]; batch_size],
        }
    }

    #[inline]
    fn load(
        &mut self,
        rank: usize,
        inputs: &Inputs<'_>,
        point_index: u32,
    ) {
        let p = point_index as usize;
        self.point_indices[rank] = point_index;
        self.positions_2d_opacities[rank] = [
            inputs.means_2d[p * 2],
            inputs.means_2d[p * 2 + 1],
            inputs.opacities[p],
        ];
        self.conics[rank] = [
            inputs.conics[p * 3],
            inputs.conics[p * 3 + 1],
            inputs.conics[p * 3 + 2],
        ];
    }

    /// Returns the alpha of the point at the pixel position,
    /// or `None` if it is negligible.
    #[inline]
    fn alpha(
        &self,
        rank: usize,
        position: [f32; 2],
    ) -> Option<f32> {
        let [x, y, opacity] = self.positions_2d_opacities[rank];
        let [a, b, c] = self.conics[rank];
        let dx = x - position[0];
        let dy = y - position[1];
        let sigma = 0.5 * (a * dx * dx + c * dy * dy) + b * dx * dy;
        let alpha = opacity * (-sigma).exp();

        // NaN is rejected as well
        (sigma >= 0.0 && alpha >= ALPHA_MIN).then(|| ALPHA_MAX.min(alpha))
    }
}

/// Running one pass with the tensors on the host.
pub fn rasterize_indices<B: Backend>(
    input: RasterizeIndicesInput<B>,
    pass: Pass<B>,
    options: &RasterizeIndicesOptions,
) -> Result<RasterizeIndicesOutput<B>, Error> {
    let layout = input.layout(options.tile_size)?;
    pass.validate(&layout)?;
    let config = LaunchConfig::new(layout, &DeviceLimits::CPU)?;
    let device = input.device();

    let means_2d = into_vec_f32(input.means_2d)?;
    let conics = into_vec_f32(input.conics)?;
    let opacities = into_vec_f32(input.opacities)?;
    let transmittances = into_vec_f32(input.transmittances)?;
    let tile_offsets = into_vec_u32(input.tile_offsets)?;
    let flatten_ids = into_vec_u32(input.flatten_ids)?;
    let (chunk_starts, index_count) = match pass {
        Pass::Count => (None, 0),
        Pass::Write {
            chunk_starts,
            index_count,
        } => (Some(into_vec_u32(chunk_starts)?), index_count),
    };
    debug_assert!(
        chunk_starts
            .iter()
            .flatten()
            .all(|&start| start as usize <= index_count),
        "The chunk starts should be no more than the index count",
    );
    let mode = match &chunk_starts {
        None => Mode::Count,
        Some(chunk_starts) => Mode::Write {
            chunk_starts,
            index_count,
        },
    };

    let outputs = main(
        &config,
        options.range_start,
        options.range_end,
        Inputs {
            means_2d: &means_2d,
            conics: &conics,
            opacities: &opacities,
            transmittances: &transmittances,
            tile_offsets: &tile_offsets,
            flatten_ids: &flatten_ids,
        },
        mode,
    );

    let shape = [
        layout.image_count as usize,
        layout.image_size_y as usize,
        layout.image_size_x as usize,
    ];
    let contributions = match outputs.contributions {
        Contributions::Counts { chunk_counts } => {
            super::Contributions::Counts {
                chunk_counts: from_vec_u32(chunk_counts, shape, &device),
            }
        },
        Contributions::Indices {
            gaussian_ids,
            pixel_ids,
        } => super::Contributions::Indices {
            gaussian_ids: from_vec_u32(gaussian_ids, [index_count], &device),
            pixel_ids: from_vec_u32(pixel_ids, [index_count], &device),
        },
    };
    let transmittances = Tensor::new(TensorPrimitive::Float(B::float_from_data(
        TensorData::new(outputs.transmittances, shape).convert::<B::FloatElem>(),
        &device,
    )));

    Ok(RasterizeIndicesOutput {
        contributions,
        transmittances,
    })
}

pub(crate) fn into_vec_f32<B: Backend, const D: usize>(
    tensor: Tensor<B, D>
) -> Result<Vec<f32>, Error> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|error| Error::Data(format!("{error:?}")))
}

pub(crate) fn into_vec_u32<B: Backend, const D: usize>(
    tensor: Tensor<B, D, Int>
) -> Result<Vec<u32>, Error> {
    tensor
        .into_data()
        .convert::<u32>()
        .to_vec::<u32>()
        .map_err(|error| Error::Data(format!("{error:?}")))
}

pub(crate) fn from_vec_u32<B: Backend, const D: usize>(
    values: Vec<u32>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    Tensor::new(B::int_from_data(
        TensorData::new(values, shape).convert::<B::IntElem>(),
        device,
    ))
}
