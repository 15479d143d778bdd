use std::fmt;

use crate::{
    error::{ErrorKind, LineageError},
    types::LineageResult,
};

#[derive(PartialEq, Copy, Clone, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum PageKind {
    Base,
    Tail,
}

impl PageKind {
    pub fn to_u8(&self) -> u8 {
        match self {
            PageKind::Base => 0,
            PageKind::Tail => 1,
        }
    }

    pub fn from_u8(value: u8) -> LineageResult<Self> {
        match value {
            0 => Ok(PageKind::Base),
            1 => Ok(PageKind::Tail),
            _ => Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!("invalid page kind: {}", value),
            )),
        }
    }

    pub fn dir_prefix(&self) -> &'static str {
        match self {
            PageKind::Base => "base",
            PageKind::Tail => "tail",
        }
    }
}

/// PageId identifies a unique page of a table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    /// index of the page range owning the page
    pub range_index: usize,

    pub kind: PageKind,

    /// position of the page in the base/tail page list of its range,
    /// start from 0
    pub page_index: usize,
}

impl PageId {
    pub fn new(range_index: usize, kind: PageKind, page_index: usize) -> Self {
        Self {
            range_index,
            kind,
            page_index,
        }
    }

    pub fn base(range_index: usize, page_index: usize) -> Self {
        Self::new(range_index, PageKind::Base, page_index)
    }

    pub fn tail(range_index: usize, page_index: usize) -> Self {
        Self::new(range_index, PageKind::Tail, page_index)
    }

    pub fn get_short_repr(&self) -> String {
        format!("{}_{}", self.kind.dir_prefix(), self.page_index)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "range_{}/{}", self.range_index, self.get_short_repr())
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
