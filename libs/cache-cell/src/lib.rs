// =====================================================================================
// CACHE CELL - READ-PATH CACHING (TTL + STALE-WHILE-REVALIDATE)
// =====================================================================================

pub mod models;
pub mod services;

pub use models::*;
pub use services::cache::ReadCacheService;
