pub mod cached;
pub mod postgres;
pub(crate) mod rows;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{
    LeadCursor, LeadFilter, LookupMetadata, LookupResult, SessionVisit, Storage, StorageError,
    StorageResult,
};
