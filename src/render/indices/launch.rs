//! Deriving the launch configuration from the layout.

pub use super::*;

use humansize::{format_size, BINARY};
use std::mem::size_of;

/// The capabilities of the device executing the groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    /// The maximum number of work-items in a group.
    pub group_size_max: u32,
    /// The maximum size of shared memory in a group, in bytes.
    pub shared_memory_size_max: u32,
}

/// Launching parameters resolved before dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    pub layout: Layout,
    /// `(T, T, 1)`
    pub group_dim: [u32; 3],
    /// `(I_x / T, I_y / T, I)`
    pub group_count: [u32; 3],
    /// `T * T * S`
    pub shared_memory_size: u32,
}

/// `S`, the shared memory used by each point in a batch.
///
/// It holds the point index, the 2D position with the opacity, and the conic.
pub const SHARED_MEMORY_SIZE_PER_POINT: u32 =
    (size_of::<u32>() + 2 * size_of::<[f32; 3]>()) as u32;

impl DeviceLimits {
    /// The host emulation of groups.
    ///
    /// It accepts the same tile sizes as a common CUDA device does.
    pub const CPU: Self = Self {
        group_size_max: 1024,
        shared_memory_size_max: 48 << 10,
    };

    /// The default limits of `wgpu`.
    ///
    /// They are the fixed values of `wgpu::Limits::default()`,
    /// not the limits queried from the adapter.
    /// An adapter may support larger tiles than these accept.
    pub const WGPU: Self = Self {
        group_size_max: 256,
        shared_memory_size_max: 16 << 10,
    };
}

impl LaunchConfig {
    /// Validating the layout against the device limits.
    ///
    /// ## Errors
    ///
    /// The requested group size or shared memory is not supported.
    pub fn new(
        layout: Layout,
        limits: &DeviceLimits,
    ) -> Result<Self, Error> {
        let tile_size = layout.tile_size;
        let group_size = tile_size as u64 * tile_size as u64;
        let shared_memory_size =
            group_size * SHARED_MEMORY_SIZE_PER_POINT as u64;

        if group_size > limits.group_size_max as u64 {
            return Err(Error::GroupSizeExceeded {
                requested: group_size,
                tile_size,
                limit: limits.group_size_max,
            });
        }
        if shared_memory_size > limits.shared_memory_size_max as u64 {
            return Err(Error::SharedMemoryExceeded {
                requested: shared_memory_size,
                tile_size,
                limit: limits.shared_memory_size_max,
            });
        }

        #[cfg(debug_assertions)]
        log::debug!(
            target: "gausplat::indexer::launch",
            "shared memory ({}) for tile size {tile_size}",
            format_size(shared_memory_size, BINARY),
        );

        Ok(Self {
            layout,
            group_dim: [tile_size, tile_size, 1],
            group_count: [
                layout.tile_count_x,
                layout.tile_count_y,
                layout.image_count,
            ],
            shared_memory_size: shared_memory_size as u32,
        })
    }

    /// Human-readable size of the shared memory of a group.
    pub fn shared_memory_size_readable(&self) -> String {
        format_size(self.shared_memory_size, BINARY)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn launch_config_dimensions() {
        use super::*;

        let layout = Layout::new(3, 100, 50, 7, 16).unwrap();
        let config = LaunchConfig::new(layout, &DeviceLimits::WGPU).unwrap();

        assert_eq!(SHARED_MEMORY_SIZE_PER_POINT, 28);
        assert_eq!(config.group_dim, [16, 16, 1]);
        assert_eq!(config.group_count, [7, 4, 3]);
        assert_eq!(config.shared_memory_size, 256 * 28);
        assert!(config.shared_memory_size_readable().contains("KiB"));
    }

    #[test]
    fn launch_config_shared_memory_exceeded() {
        use super::*;

        let limits = DeviceLimits {
            group_size_max: u32::MAX,
            shared_memory_size_max: 16 << 10,
        };
        let layout = Layout::new(1, 64, 64, 1, 32).unwrap();
        let error = LaunchConfig::new(layout, &limits).unwrap_err();

        match error {
            Error::SharedMemoryExceeded {
                requested,
                tile_size,
                limit,
            } => {
                assert_eq!(requested, 32 * 32 * 28);
                assert_eq!(tile_size, 32);
                assert_eq!(limit, 16 << 10);
            },
            error => panic!("Unexpected error: {error:?}"),
        }

        let message = LaunchConfig::new(layout, &limits).unwrap_err().to_string();
        assert!(message.contains("28672 bytes"), "{message}");
        assert!(message.contains("smaller tile size"), "{message}");
    }

    #[test]
    fn launch_config_group_size_exceeded() {
        use super::*;

        let layout = Layout::new(1, 64, 64, 1, 32).unwrap();
        let error = LaunchConfig::new(layout, &DeviceLimits::WGPU).unwrap_err();
        assert!(matches!(
            error,
            Error::GroupSizeExceeded {
                requested: 1024,
                tile_size: 32,
                limit: 256,
            }
        ));

        assert!(LaunchConfig::new(layout, &DeviceLimits::CPU).is_ok());
    }

    #[test]
    fn device_limits_wgpu_are_defaults() {
        use super::*;

        // max_compute_invocations_per_workgroup
        assert_eq!(DeviceLimits::WGPU.group_size_max, 256);
        // max_compute_workgroup_storage_size
        assert_eq!(DeviceLimits::WGPU.shared_memory_size_max, 16384);

        // The default tile size fits
        let layout = Layout::new(1, 64, 64, 1, TILE_SIZE).unwrap();
        assert!(LaunchConfig::new(layout, &DeviceLimits::WGPU).is_ok());
    }
}
