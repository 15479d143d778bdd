pub mod addressing;
pub mod buffer_pool;
pub mod disk;
pub mod metadata;
pub mod page;
pub mod page_id;
pub mod page_range;
pub mod physical_page;

pub use buffer_pool::{BufferPool, PageGuard, PageWriteGuard};
pub use disk::{DiskManager, FileDisk, MemoryDisk};
pub use page::{Indirection, Page};
pub use page_id::{PageId, PageKind};
pub use page_range::PageRange;
