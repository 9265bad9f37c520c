#[macro_use]
extern crate async_trait;

pub mod limiter;
pub mod pool;
