//! Remote collaborators: the Home Assistant client, the entity watcher and Last.fm

pub mod entity_watcher;
pub mod handle;
pub mod home_assistant;
pub mod lastfm;
pub mod traits;

pub use entity_watcher::EntityWatcher;
pub use handle::{AdapterHandle, RetryConfig};
pub use home_assistant::HomeAssistantClient;
pub use lastfm::LastFmClient;
pub use traits::{AdapterContext, AdapterLogic, CallResult, RemoteControl, RemoteError};
