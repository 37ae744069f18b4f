//! Addressing the flattened arrays by image, tile and pixel.

pub use super::*;

use std::ops::Range;

/// The geometry shared by both passes.
///
/// Every linear offset into the flattened inputs and outputs is derived here,
/// so the counting pass and the writing pass can never disagree on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Layout {
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
    /// `T`
    pub tile_size: u32,
}

/// The half-open range of a tile in the intersection list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileRange {
    pub start: u32,
    pub end: u32,
}

impl Layout {
    pub fn new(
        image_count: u32,
        image_size_x: u32,
        image_size_y: u32,
        point_count: u32,
        tile_size: u32,
    ) -> Result<Self, Error> {
        if tile_size == 0 {
            return Err(Error::Validation(
                "tile_size".into(),
                "greater than 0".into(),
            ));
        }
        if tile_size.checked_mul(tile_size).is_none() {
            return Err(Error::Validation(
                format!("tile_size ({tile_size}) squared"),
                format!("no more than {}", u32::MAX),
            ));
        }

        Ok(Self {
            image_count,
            image_size_x,
            image_size_y,
            point_count,
            tile_count_x: image_size_x.div_ceil(tile_size),
            tile_count_y: image_size_y.div_ceil(tile_size),
            tile_size,
        })
    }

    /// `T * T`, the number of work-items in a group and points in a batch.
    #[inline]
    pub const fn batch_size(&self) -> u32 {
        self.tile_size * self.tile_size
    }

    /// `I_y * I_x`
    #[inline]
    pub const fn image_pixel_count(&self) -> usize {
        self.image_size_y as usize * self.image_size_x as usize
    }

    /// `I * I_y * I_x`
    #[inline]
    pub const fn pixel_count(&self) -> usize {
        self.image_count as usize * self.image_pixel_count()
    }

    /// `(I_y / T) * (I_x / T)`
    #[inline]
    pub const fn image_tile_count(&self) -> usize {
        self.tile_count_y as usize * self.tile_count_x as usize
    }

    /// `I * (I_y / T) * (I_x / T)`, the number of groups.
    #[inline]
    pub const fn tile_count(&self) -> usize {
        self.image_count as usize * self.image_tile_count()
    }

    #[inline]
    pub const fn contains(
        &self,
        pixel_y: u32,
        pixel_x: u32,
    ) -> bool {
        pixel_y < self.image_size_y && pixel_x < self.image_size_x
    }

    /// `image * I_y * I_x + y * I_x + x`
    #[inline]
    pub const fn pixel_id(
        &self,
        image_id: u32,
        pixel_y: u32,
        pixel_x: u32,
    ) -> u32 {
        image_id * self.image_size_y * self.image_size_x
            + pixel_y * self.image_size_x
            + pixel_x
    }

    /// `image * (I_y / T) * (I_x / T) + y * (I_x / T) + x`
    #[inline]
    pub const fn tile_id(
        &self,
        image_id: u32,
        tile_y: u32,
        tile_x: u32,
    ) -> u32 {
        image_id * self.tile_count_y * self.tile_count_x
            + tile_y * self.tile_count_x
            + tile_x
    }

    /// Returns `(image_id, tile_y, tile_x)` of the group.
    ///
    /// Groups are ordered the same way as tiles, so the group ID is the tile ID.
    #[inline]
    pub const fn tile_position(
        &self,
        tile_id: u32,
    ) -> (u32, u32, u32) {
        let image_tile_count = self.tile_count_y * self.tile_count_x;
        let image_id = tile_id / image_tile_count;
        let tile_id = tile_id % image_tile_count;
        (
            image_id,
            tile_id / self.tile_count_x,
            tile_id % self.tile_count_x,
        )
    }

    /// Returns `(pixel_y, pixel_x)` of the work-item ranked `rank` in the tile.
    #[inline]
    pub const fn pixel_position(
        &self,
        tile_y: u32,
        tile_x: u32,
        rank: u32,
    ) -> (u32, u32) {
        (
            tile_y * self.tile_size + rank / self.tile_size,
            tile_x * self.tile_size + rank % self.tile_size,
        )
    }

    /// Resolving the range of the tile in the intersection list.
    ///
    /// ## Arguments
    ///
    /// * `tile_offsets` - `[I, I_y / T, I_x / T]`
    /// * `isect_count` - The length of the intersection list.
    pub fn tile_range(
        &self,
        tile_offsets: &[u32],
        isect_count: u32,
        tile_id: u32,
    ) -> TileRange {
        let tile_id = tile_id as usize;
        let start = tile_offsets[tile_id];
        let end = if tile_id + 1 < self.tile_count() {
            tile_offsets[tile_id + 1]
        } else {
            isect_count
        };

        debug_assert!(
            start <= end,
            "The tile offsets should be non-decreasing ({start} > {end} at tile {tile_id})",
        );

        TileRange { start, end }
    }
}

impl TileRange {
    #[inline]
    pub const fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `ceil(len / batch_size)`
    #[inline]
    pub const fn batch_count(
        &self,
        batch_size: u32,
    ) -> u32 {
        self.len().div_ceil(batch_size)
    }

    /// The intersection indices covered by the batch, clamped to the tile.
    #[inline]
    pub fn batch(
        &self,
        batch: u32,
        batch_size: u32,
    ) -> Range<u32> {
        let start = self.start + batch * batch_size;
        start.min(self.end)..(start + batch_size).min(self.end)
    }
}
