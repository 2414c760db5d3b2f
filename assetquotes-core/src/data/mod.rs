//! Remote provider, persisted storage and the supported universe

pub mod cache;
pub mod provider;
pub mod static_provider;
pub mod storage;
pub mod tiingo;
pub mod universe;

pub use cache::FileStorage;
pub use provider::{DataError, QuoteProvider, SupportedTicker};
pub use static_provider::StaticProvider;
pub use storage::{MemoryStorage, RecordStorage, StorageError};
pub use tiingo::{TiingoProvider, TiingoSettings};
pub use universe::{RefreshOutcome, SupportedUniverse, UniverseSnapshot};
