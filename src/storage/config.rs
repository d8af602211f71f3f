//! Configuration for the buffer pool and the file backend.

/// Number of frames a pool gets when no capacity is configured.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Buffer pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Number of page frames, fixed for the lifetime of the pool.
    pub capacity: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl BufferPoolConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        BufferPoolConfig { capacity }
    }
}

/// File backend configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskConfig {
    /// Whether to `fsync` the file after every page write.
    pub sync_on_write: bool,
}

impl Default for DiskConfig {
    fn default() -> Self {
        DiskConfig {
            sync_on_write: true,
        }
    }
}

impl DiskConfig {
    pub fn sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }
}
