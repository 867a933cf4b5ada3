pub mod abuse;
pub mod cache_key;
pub mod clock;
pub mod config;
pub mod identity;
pub mod product;

pub use abuse::*;
pub use cache_key::*;
pub use clock::*;
pub use config::*;
pub use identity::*;
pub use product::*;
