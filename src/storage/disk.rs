use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::debug;

use crate::{
    config::PAGE_SIZE,
    error::{ErrorKind, LineageError},
    storage::{page::PAGE_HEADER_SIZE, page_id::PageId},
    types::LineageResult,
    utils::HandyMutex,
};

const TABLE_HEADER_FILE: &str = "table.meta";
const RANGE_HEADER_FILE: &str = "range.meta";
const PAGE_HEADER_FILE: &str = "header";

/// Where the buffer pool fills its misses from and flushes dirty pages
/// to. Page bytes are opaque to the disk, they are produced by
/// `Page::to_bytes`.
pub trait DiskManager: Send + Sync {
    fn load_page(&self, pid: &PageId) -> LineageResult<Option<Vec<u8>>>;
    fn flush_page(&self, pid: &PageId, bytes: &[u8]) -> LineageResult;

    fn load_range_header(&self, range_index: usize) -> LineageResult<Option<Vec<u8>>>;
    fn flush_range_header(&self, range_index: usize, bytes: &[u8]) -> LineageResult;

    fn load_table_header(&self) -> LineageResult<Option<Vec<u8>>>;
    fn flush_table_header(&self, bytes: &[u8]) -> LineageResult;
}

/// Keeps everything in memory, pages evicted from the buffer pool end up
/// here.
#[derive(Default)]
pub struct MemoryDisk {
    pages: Mutex<HashMap<PageId, Vec<u8>>>,
    range_headers: Mutex<HashMap<usize, Vec<u8>>>,
    table_header: Mutex<Option<Vec<u8>>>,
}

impl MemoryDisk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages_count(&self) -> usize {
        self.pages.ml().len()
    }
}

impl DiskManager for MemoryDisk {
    fn load_page(&self, pid: &PageId) -> LineageResult<Option<Vec<u8>>> {
        Ok(self.pages.ml().get(pid).cloned())
    }

    fn flush_page(&self, pid: &PageId, bytes: &[u8]) -> LineageResult {
        self.pages.ml().insert(*pid, bytes.to_vec());
        Ok(())
    }

    fn load_range_header(&self, range_index: usize) -> LineageResult<Option<Vec<u8>>> {
        Ok(self.range_headers.ml().get(&range_index).cloned())
    }

    fn flush_range_header(&self, range_index: usize, bytes: &[u8]) -> LineageResult {
        self.range_headers.ml().insert(range_index, bytes.to_vec());
        Ok(())
    }

    fn load_table_header(&self) -> LineageResult<Option<Vec<u8>>> {
        Ok(self.table_header.ml().clone())
    }

    fn flush_table_header(&self, bytes: &[u8]) -> LineageResult {
        *self.table_header.ml() = Some(bytes.to_vec());
        Ok(())
    }
}

/// One directory per table:
///
/// ```text
/// <root>/table.meta
/// <root>/range_<r>/range.meta
/// <root>/range_<r>/base_<p>/header
/// <root>/range_<r>/base_<p>/col_<k>
/// <root>/range_<r>/tail_<p>/...
/// ```
///
/// Every physical column of a page goes to its own file.
pub struct FileDisk {
    root: PathBuf,
}

impl FileDisk {
    /// Open the table directory, it's created if missing.
    pub fn new<P: AsRef<Path>>(root: P) -> LineageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn range_dir(&self, range_index: usize) -> PathBuf {
        self.root.join(format!("range_{}", range_index))
    }

    fn page_dir(&self, pid: &PageId) -> PathBuf {
        self.range_dir(pid.range_index).join(pid.get_short_repr())
    }

    fn read_optional(path: &Path) -> LineageResult<Option<Vec<u8>>> {
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }
}

impl DiskManager for FileDisk {
    fn load_page(&self, pid: &PageId) -> LineageResult<Option<Vec<u8>>> {
        let dir = self.page_dir(pid);
        let header = match Self::read_optional(&dir.join(PAGE_HEADER_FILE))? {
            Some(header) => header,
            None => return Ok(None),
        };
        if header.len() != PAGE_HEADER_SIZE {
            return Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!("page header of {} has {} bytes", pid, header.len()),
            ));
        }

        let mut bytes = header;
        let mut column = 0;
        loop {
            let path = dir.join(format!("col_{}", column));
            if !path.exists() {
                break;
            }
            bytes.extend_from_slice(&fs::read(path)?);
            column += 1;
        }

        debug!("loaded page {} with {} columns from disk", pid, column);
        Ok(Some(bytes))
    }

    fn flush_page(&self, pid: &PageId, bytes: &[u8]) -> LineageResult {
        if bytes.len() < PAGE_HEADER_SIZE || (bytes.len() - PAGE_HEADER_SIZE) % PAGE_SIZE != 0 {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("malformed page image of {} bytes for {}", bytes.len(), pid),
            ));
        }

        let dir = self.page_dir(pid);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(PAGE_HEADER_FILE), &bytes[..PAGE_HEADER_SIZE])?;
        for (k, column) in bytes[PAGE_HEADER_SIZE..].chunks(PAGE_SIZE).enumerate() {
            fs::write(dir.join(format!("col_{}", k)), column)?;
        }
        Ok(())
    }

    fn load_range_header(&self, range_index: usize) -> LineageResult<Option<Vec<u8>>> {
        Self::read_optional(&self.range_dir(range_index).join(RANGE_HEADER_FILE))
    }

    fn flush_range_header(&self, range_index: usize, bytes: &[u8]) -> LineageResult {
        let dir = self.range_dir(range_index);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(RANGE_HEADER_FILE), bytes)?;
        Ok(())
    }

    fn load_table_header(&self) -> LineageResult<Option<Vec<u8>>> {
        Self::read_optional(&self.root.join(TABLE_HEADER_FILE))
    }

    fn flush_table_header(&self, bytes: &[u8]) -> LineageResult {
        fs::write(self.root.join(TABLE_HEADER_FILE), bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::page::{Indirection, Page},
        storage::page_id::PageKind,
        utils::Encodeable,
    };

    #[test]
    fn test_file_disk_page_layout() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FileDisk::new(dir.path().join("grades")).unwrap();

        let pid = PageId::tail(2, 5);
        let mut page = Page::new(PageKind::Tail, 2);
        page.insert(1, &[3, 4], Indirection::Base(7), 0b10, false)
            .unwrap();
        disk.flush_page(&pid, &page.to_bytes()).unwrap();

        let page_dir = disk.root().join("range_2").join("tail_5");
        assert!(page_dir.join("header").exists());
        // 3 metadata columns + 2 data columns
        assert!(page_dir.join("col_4").exists());
        assert!(!page_dir.join("col_5").exists());

        let loaded = Page::from_bytes(&disk.load_page(&pid).unwrap().unwrap()).unwrap();
        assert_eq!(loaded.read_columns(1).unwrap(), vec![3, 4]);

        assert!(disk.load_page(&PageId::base(0, 0)).unwrap().is_none());
    }

    #[test]
    fn test_memory_disk_headers() {
        let disk = MemoryDisk::new();
        assert!(disk.load_table_header().unwrap().is_none());
        disk.flush_table_header(&[1, 2]).unwrap();
        disk.flush_range_header(3, &[4]).unwrap();
        assert_eq!(disk.load_table_header().unwrap(), Some(vec![1, 2]));
        assert_eq!(disk.load_range_header(3).unwrap(), Some(vec![4]));
        assert!(disk.load_range_header(0).unwrap().is_none());
    }
}
