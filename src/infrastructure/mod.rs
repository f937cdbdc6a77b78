//! Infrastructure adapters for the domain ports.

pub mod clock;
pub(crate) mod constraints;
pub mod in_memory;
pub mod media;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
