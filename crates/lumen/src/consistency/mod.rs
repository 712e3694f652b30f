//! Reacting to file-system changes.

mod events;
mod maintainer;

pub use events::FileEvent;
pub use maintainer::ConsistencyMaintainer;
