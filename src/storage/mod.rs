// Storage boundary (adapter trait) and the in-memory reference store

pub mod adapter;
pub mod memory;

pub use adapter::{RowScan, TableStore};
pub use memory::MemoryStore;
