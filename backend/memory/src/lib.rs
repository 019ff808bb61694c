pub mod assembler;
pub mod sqlite_store;
pub mod store;

pub use assembler::{CompressionSettings, ContextAssembler, SummaryCache};
pub use sqlite_store::SqliteSessionStore;
pub use store::InMemorySessionStore;
