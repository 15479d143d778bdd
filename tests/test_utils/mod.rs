#![allow(dead_code)]

mod setup;

pub use setup::*;
