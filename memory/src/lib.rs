pub mod collection;
pub mod executor;
pub mod provider;

pub use collection::{MEMORY_DRIVER, MemoryCollection};
pub use provider::{MemoryProvider, TO_VEC_OP, register_memory_ops};
