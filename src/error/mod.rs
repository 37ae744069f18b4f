#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Data Error: {0}")]
    Data(String),

    #[error(
        "Group Size Error: Tile size {tile_size} requires {requested} invocations \
        per group, but the device supports at most {limit}. Try a smaller tile size."
    )]
    GroupSizeExceeded {
        requested: u64,
        tile_size: u32,
        limit: u32,
    },

    #[error(
        "Shared Memory Error: Tile size {tile_size} requires {requested} bytes of \
        shared memory, but the device supports at most {limit} bytes. Try a smaller tile size."
    )]
    SharedMemoryExceeded {
        requested: u64,
        tile_size: u32,
        limit: u32,
    },

    #[error("Validation Error: {0} should be {1}")]
    Validation(String, String),
}
