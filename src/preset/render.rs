/// The ceiling of alpha in the transmittance recurrence.
pub const ALPHA_MAX: f32 = 0.999;
/// Alpha below this value is negligible.
pub const ALPHA_MIN: f32 = 1.0 / 255.0;
/// The pixel is closed once the transmittance is no more than this value.
pub const TRANSMITTANCE_MIN: f32 = 1e-4;
/// `T`
pub const TILE_SIZE: u32 = 16;
