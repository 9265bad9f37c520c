#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate lazy_static;

pub mod cache;
pub mod engine;
pub mod wal;
