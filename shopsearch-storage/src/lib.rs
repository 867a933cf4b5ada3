pub mod catalog;
pub mod memory;
pub mod redis;

pub use catalog::{CatalogBackend, CatalogProduct};
pub use memory::MemoryStore;
pub use self::redis::{RedisConfig, RedisStore};
