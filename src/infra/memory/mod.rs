//! In-process collaborators for tests, demos and local runs.

mod media;
mod session;
mod store;

pub use media::{MemoryMediaStorage, StoredMedia};
pub use session::StaticSession;
pub use store::{MemoryDocumentStore, StoreOp};
