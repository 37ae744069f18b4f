//! Random scenes binned into tiles, with a per-pixel reference.

use super::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};

#[derive(Clone, Debug)]
pub struct Scene {
    pub layout: Layout,
    /// `[I, N, 2]`
    pub means_2d: Vec<f32>,
    /// `[I, N, 3]`
    pub conics: Vec<f32>,
    /// `[I, N]`
    pub opacities: Vec<f32>,
    /// `[I, I_y, I_x]`
    pub transmittances: Vec<f32>,
    /// `[I, I_y / T, I_x / T]`
    pub tile_offsets: Vec<u32>,
    /// `[T']`
    pub flatten_ids: Vec<u32>,
}

impl Scene {
    pub fn random(
        seed: u64,
        image_count: u32,
        image_size_x: u32,
        image_size_y: u32,
        point_count: u32,
        tile_size: u32,
    ) -> Self {
        let layout = Layout::new(
            image_count,
            image_size_x,
            image_size_y,
            point_count,
            tile_size,
        )
        .unwrap();
        let rng = &mut StdRng::seed_from_u64(seed);
        let scalings = LogNormal::<f32>::new(0.5, 0.75).unwrap();
        let size_x = image_size_x as f32;
        let size_y = image_size_y as f32;
        let total = (image_count * point_count) as usize;

        let mut means_2d = Vec::with_capacity(total * 2);
        let mut conics = Vec::with_capacity(total * 3);
        let mut opacities = Vec::with_capacity(total);
        let mut depths = Vec::with_capacity(total);
        let mut radii = Vec::with_capacity(total);

        for _ in 0..total {
            let x = rng.gen_range(-0.1 * size_x..1.1 * size_x);
            let y = rng.gen_range(-0.1 * size_y..1.1 * size_y);
            let s_x = scalings.sample(rng).clamp(0.3, 12.0);
            let s_y = scalings.sample(rng).clamp(0.3, 12.0);
            let (sin, cos) = rng.gen_range(0.0..std::f32::consts::PI).sin_cos();

            // R * S * S * R^T
            let c_00 = cos * cos * s_x * s_x + sin * sin * s_y * s_y;
            let c_01 = cos * sin * (s_x * s_x - s_y * s_y);
            let c_11 = sin * sin * s_x * s_x + cos * cos * s_y * s_y;
            let det = c_00 * c_11 - c_01 * c_01;

            means_2d.extend([x, y]);
            conics.extend([c_11 / det, -c_01 / det, c_00 / det]);
            opacities.push(rng.gen_range(0.0..1.0));
            depths.push(rng.gen_range(0.0..1.0f32));
            radii.push(3.0 * s_x.max(s_y));
        }

        // Some pixels are partially covered, and few of them are closed.
        let transmittances = (0..layout.pixel_count())
            .map(|_| match rng.gen_range(0..16) {
                0 => 0.0,
                1..=3 => rng.gen_range(0.01..1.0),
                _ => 1.0,
            })
            .collect();

        // Binning the points into tiles, sorted by depth

        let mut tile_offsets = Vec::with_capacity(layout.tile_count());
        let mut flatten_ids = vec![];
        for tile_id in 0..layout.tile_count() as u32 {
            let (image_id, tile_y, tile_x) = layout.tile_position(tile_id);
            let x_min = (tile_x * tile_size) as f32;
            let y_min = (tile_y * tile_size) as f32;
            let x_max = x_min + tile_size as f32;
            let y_max = y_min + tile_size as f32;

            let mut ids = (image_id * point_count..(image_id + 1) * point_count)
                .filter(|&id| {
                    let p = id as usize;
                    let (x, y, r) = (means_2d[p * 2], means_2d[p * 2 + 1], radii[p]);
                    x + r >= x_min && x - r < x_max && y + r >= y_min && y - r < y_max
                })
                .collect::<Vec<_>>();
            ids.sort_by(|&a, &b| depths[a as usize].total_cmp(&depths[b as usize]));

            tile_offsets.push(flatten_ids.len() as u32);
            flatten_ids.extend(ids);
        }

        Self {
            layout,
            means_2d,
            conics,
            opacities,
            transmittances,
            tile_offsets,
            flatten_ids,
        }
    }

    pub fn inputs(&self) -> cpu::Inputs<'_> {
        cpu::Inputs {
            means_2d: &self.means_2d,
            conics: &self.conics,
            opacities: &self.opacities,
            transmittances: &self.transmittances,
            tile_offsets: &self.tile_offsets,
            flatten_ids: &self.flatten_ids,
        }
    }

    pub fn tensors<B: Backend>(
        &self,
        device: &B::Device,
    ) -> RasterizeIndicesInput<B> {
        let layout = &self.layout;
        let i = layout.image_count as usize;
        let n = layout.point_count as usize;
        let h = layout.image_size_y as usize;
        let w = layout.image_size_x as usize;
        let t_y = layout.tile_count_y as usize;
        let t_x = layout.tile_count_x as usize;

        let floats = |values: &[f32], shape: Vec<usize>| {
            TensorData::new(values.to_vec(), shape).convert::<B::FloatElem>()
        };
        let ints = |values: &[u32], shape: Vec<usize>| {
            TensorData::new(values.to_vec(), shape).convert::<B::IntElem>()
        };

        RasterizeIndicesInput {
            means_2d: Tensor::from_data(floats(&self.means_2d, vec![i, n, 2]), device),
            conics: Tensor::from_data(floats(&self.conics, vec![i, n, 3]), device),
            opacities: Tensor::from_data(floats(&self.opacities, vec![i, n]), device),
            transmittances: Tensor::from_data(
                floats(&self.transmittances, vec![i, h, w]),
                device,
            ),
            tile_offsets: Tensor::from_data(
                ints(&self.tile_offsets, vec![i, t_y, t_x]),
                device,
            ),
            flatten_ids: Tensor::from_data(
                ints(&self.flatten_ids, vec![self.flatten_ids.len()]),
                device,
            ),
        }
    }

    /// The contributing points of each pixel, computed pixel by pixel.
    pub fn reference(
        &self,
        range_start: u32,
        range_end: u32,
    ) -> Vec<Vec<u32>> {
        let layout = &self.layout;
        let batch_size = layout.batch_size() as u64;

        (0..layout.pixel_count() as u32)
            .map(|pixel_id| {
                let image_pixel_count = layout.image_pixel_count() as u32;
                let image_id = pixel_id / image_pixel_count;
                let pixel_y = pixel_id % image_pixel_count / layout.image_size_x;
                let pixel_x = pixel_id % layout.image_size_x;
                let tile_id = layout.tile_id(
                    image_id,
                    pixel_y / layout.tile_size,
                    pixel_x / layout.tile_size,
                );
                let range = layout.tile_range(
                    &self.tile_offsets,
                    self.flatten_ids.len() as u32,
                    tile_id,
                );
                let start = (range.start as u64 + range_start as u64 * batch_size)
                    .min(range.end as u64);
                let end = (range.start as u64 + range_end as u64 * batch_size)
                    .min(range.end as u64);
                let px = pixel_x as f32 + 0.5;
                let py = pixel_y as f32 + 0.5;

                let mut ids = vec![];
                let mut transmittance = self.transmittances[pixel_id as usize];
                if transmittance <= TRANSMITTANCE_MIN {
                    return ids;
                }

                for isect_id in start..end {
                    let id = self.flatten_ids[isect_id as usize];
                    let p = id as usize;
                    let dx = self.means_2d[p * 2] - px;
                    let dy = self.means_2d[p * 2 + 1] - py;
                    let [a, b, c] = [
                        self.conics[p * 3],
                        self.conics[p * 3 + 1],
                        self.conics[p * 3 + 2],
                    ];
                    let sigma = 0.5 * (a * dx * dx + c * dy * dy) + b * dx * dy;
                    let alpha = self.opacities[p] * (-sigma).exp();
                    if !(sigma >= 0.0 && alpha >= ALPHA_MIN) {
                        continue;
                    }
                    let alpha = ALPHA_MAX.min(alpha);

                    let transmittance_next = transmittance * (1.0 - alpha);
                    if transmittance_next <= TRANSMITTANCE_MIN {
                        break;
                    }

                    ids.push(id % layout.point_count);
                    transmittance = transmittance_next;
                }

                ids
            })
            .collect()
    }
}
