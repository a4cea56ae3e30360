/// Live acquisition polling.
///
/// ```text
///   LiveDataManager ──requests──► Worker thread ──► LiveSource (TCP)
///        ▲                          │ owns LiveState
///        └──── replies / LiveEvent ─┘
/// ```

pub mod manager;
pub mod state;

pub use manager::{LiveDataManager, LiveEvent, LiveSource};
pub use state::Snapshot;
