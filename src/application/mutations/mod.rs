mod likes;
mod posts;
mod saves;
mod service;
pub mod state;
pub mod types;

pub use service::MutationCoordinator;
pub use state::{MutationKind, MutationPhase, MutationTracker, TransitionError};
pub use types::{MutationError, NewPost, PostUpdate, RolledBackChange, SaveOutcome};
