//! Data models

pub mod proxy;

pub use proxy::*;
