mod io;
mod other;

pub use io::{Decodeable, Encodeable, LineageReader, LineageWriter};
pub use other::{HandyMutex, HandyRwLock};

pub use crate::log::init_log;
