mod bytes;
mod generic;

pub use bytes::LimitedBytes;
pub use generic::Generic;
