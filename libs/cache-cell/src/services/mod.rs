pub mod cache;

pub use cache::ReadCacheService;
