//! Layout constants and runtime knobs.

/// Size of a physical page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Every entry of a physical page is a big-endian i64.
pub const ENTRY_SIZE: usize = 8;

pub const RECORDS_PER_PAGE: usize = PAGE_SIZE / ENTRY_SIZE;

pub const BASE_PAGES_PER_RANGE: usize = 16;

pub const RECORDS_PER_RANGE: usize = RECORDS_PER_PAGE * BASE_PAGES_PER_RANGE;

/// Indirection, RID/TID and schema encoding.
pub const METADATA_COLUMNS: usize = 3;

/// The schema encoding of a slot is a u64 bitmask.
pub const MAX_COLUMNS: usize = 64;

pub const DEFAULT_BUFFERPOOL_SIZE: usize = 256;

pub const DEFAULT_MERGE_THRESHOLD: usize = 1024;

/// Runtime configuration of a table.
#[derive(Debug, Clone)]
pub struct Config {
    /// Max number of pages (frames) cached by the buffer pool.
    pub bufferpool_size: usize,

    /// Number of updates a page range accumulates before a merge is
    /// scheduled.
    pub merge_threshold: usize,

    /// Run scheduled merges on the table's merge thread. When false, a
    /// due merge runs on the updating thread after it released the page
    /// range.
    pub background_merge: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bufferpool_size: DEFAULT_BUFFERPOOL_SIZE,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            background_merge: true,
        }
    }
}

impl Config {
    pub fn with_bufferpool_size(mut self, size: usize) -> Self {
        self.bufferpool_size = size;
        self
    }

    pub fn with_merge_threshold(mut self, threshold: usize) -> Self {
        self.merge_threshold = threshold;
        self
    }

    pub fn with_background_merge(mut self, enabled: bool) -> Self {
        self.background_merge = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_constants() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(RECORDS_PER_PAGE, 512);
        assert_eq!(RECORDS_PER_RANGE, 512 * 16);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::default()
            .with_bufferpool_size(8)
            .with_merge_threshold(3)
            .with_background_merge(false);
        assert_eq!(config.bufferpool_size, 8);
        assert_eq!(config.merge_threshold, 3);
        assert!(!config.background_merge);
    }
}
