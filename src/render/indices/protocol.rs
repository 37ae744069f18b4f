//! Sequencing the counting pass and the writing pass.

pub use super::*;

use std::ops::Range;

/// The compact contributions of a batch range.
#[derive(Clone)]
pub struct IndexPairs<B: Backend> {
    /// `[I, I_y, I_x]`
    pub chunk_counts: Tensor<B, 3, Int>,
    /// `[I, I_y, I_x]`
    pub chunk_starts: Tensor<B, 3, Int>,
    /// `[T'']`
    pub gaussian_ids: Tensor<B, 1, Int>,
    /// `T''`
    pub index_count: usize,
    /// `[T'']`
    pub pixel_ids: Tensor<B, 1, Int>,
    /// `[I, I_y, I_x]`
    pub transmittances: Tensor<B, 3>,
}

/// Walking the batch ranges in fixed steps.
///
/// Each step runs both passes and carries the residual transmittances
/// into the next step.
#[derive(Clone)]
pub struct IndexSteps<B: IndicesRasterizer> {
    input: RasterizeIndicesInput<B>,
    options: RasterizeIndicesOptions,
    batch_step: u32,
    range_next: u32,
    range_end: u32,
}

/// Scanning the counts exclusively.
///
/// ## Returns
///
/// The offsets and the total of the counts.
pub fn scan_exclusive(counts: &[u32]) -> (Vec<u32>, usize) {
    let total = counts.iter().map(|&count| count as usize).sum::<usize>();
    let offsets = counts
        .iter()
        .scan(0, |state, &count| {
            let offset = *state;
            *state += count;
            Some(offset)
        })
        .collect();

    (offsets, total)
}

/// Rasterizing the points to the compact contributions in a batch range.
///
/// It counts the contributions, scans the counts, and then writes them.
pub fn rasterize_to_indices_in_range<B: IndicesRasterizer>(
    input: RasterizeIndicesInput<B>,
    options: &RasterizeIndicesOptions,
) -> Result<IndexPairs<B>, Error> {
    #[cfg(debug_assertions)]
    log::debug!(
        target: "gausplat::indexer::protocol",
        "rasterize_to_indices_in_range [{}, {})",
        options.range_start,
        options.range_end,
    );

    let device = input.device();
    let shape = input.transmittances.dims();

    // Counting

    let chunk_counts = B::rasterize_indices(input.to_owned(), Pass::Count, options)?
        .contributions
        .into_counts()
        .ok_or_else(|| Error::Data("The counting pass has no counts".into()))?;

    // Scanning

    let (chunk_starts, index_count) =
        scan_exclusive(&cpu::into_vec_u32(chunk_counts.to_owned())?);
    let chunk_starts = cpu::from_vec_u32::<B, 3>(chunk_starts, shape, &device);

    #[cfg(debug_assertions)]
    log::debug!(
        target: "gausplat::indexer::protocol",
        "index_count ({index_count})",
    );

    // Writing

    let output = B::rasterize_indices(
        input,
        Pass::Write {
            chunk_starts: chunk_starts.to_owned(),
            index_count,
        },
        options,
    )?;
    let (gaussian_ids, pixel_ids) = output
        .contributions
        .into_indices()
        .ok_or_else(|| Error::Data("The writing pass has no indices".into()))?;

    Ok(IndexPairs {
        chunk_counts,
        chunk_starts,
        gaussian_ids,
        index_count,
        pixel_ids,
        transmittances: output.transmittances,
    })
}

impl<B: IndicesRasterizer> IndexSteps<B> {
    /// Stepping `batch_step` batches at a time in
    /// `options.range_start..options.range_end`.
    ///
    /// The end is clamped to the largest batch count of the tiles.
    pub fn new(
        input: RasterizeIndicesInput<B>,
        options: RasterizeIndicesOptions,
        batch_step: u32,
    ) -> Result<Self, Error> {
        if batch_step == 0 {
            return Err(Error::Validation(
                "batch_step".into(),
                "greater than 0".into(),
            ));
        }

        let layout = input.layout(options.tile_size)?;
        let tile_offsets = cpu::into_vec_u32(input.tile_offsets.to_owned())?;
        let isect_count = input.flatten_ids.dims()[0] as u32;
        let batch_count_max = (0..layout.tile_count() as u32)
            .map(|tile_id| {
                layout
                    .tile_range(&tile_offsets, isect_count, tile_id)
                    .batch_count(layout.batch_size())
            })
            .max()
            .unwrap_or_default();

        Ok(Self {
            range_end: options.range_end.min(batch_count_max),
            range_next: options.range_start,
            batch_step,
            input,
            options,
        })
    }

    /// The residual transmittances before the next step.
    pub fn transmittances(&self) -> &Tensor<B, 3> {
        &self.input.transmittances
    }
}

impl<B: IndicesRasterizer> Iterator for IndexSteps<B> {
    type Item = Result<(Range<u32>, IndexPairs<B>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.range_next >= self.range_end {
            return None;
        }

        let range_start = self.range_next;
        let range_end = range_start
            .saturating_add(self.batch_step)
            .min(self.range_end);
        let options = self
            .options
            .clone()
            .with_range_start(range_start)
            .with_range_end(range_end);

        let result = rasterize_to_indices_in_range(self.input.to_owned(), &options);
        match &result {
            Ok(pairs) => {
                self.input.transmittances = pairs.transmittances.to_owned();
                self.range_next = range_end;
            },
            // Stopping after the first error
            Err(_) => self.range_next = self.range_end,
        }

        Some(result.map(|pairs| (range_start..range_end, pairs)))
    }
}
