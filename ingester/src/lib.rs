pub mod actor;
pub mod cache;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod ingester;
pub mod store;
pub mod telemetry;

pub use actor::{Actor, ActorStatus};
pub use cache::ActorCache;
pub use error::{HandleError, IngestError, StoreError};
pub use ingester::{FirehoseIngester, IngesterConfig};
pub use store::{MemStore, SqliteStore, Store};
