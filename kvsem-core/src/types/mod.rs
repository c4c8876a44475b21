mod holder;
mod kv;
mod resource;

pub use holder::HolderMap;
pub use kv::{KvEntry, PutOptions, SessionBehavior, SessionInfo, SessionRequest};
pub use resource::{ResourceDescriptor, ResourceOutcome};
