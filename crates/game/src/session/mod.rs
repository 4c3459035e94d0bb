//! Server and client sessions: a [`World`] plus the level loader and the
//! handling of joins, chat and level changes on top of it.

mod client;
mod server;

pub use client::{ClientConfig, ClientSession};
pub use server::{ServerConfig, ServerSession};

use crate::level::{LevelLoader, LoaderEvent};
use crate::world::World;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadProgress {
    Pending,
    Ready(String),
    Failed,
    Unloaded,
}

/// Applies whatever the loader finished since the last tick. A deferred
/// unload is reported, the caller closes its level.
fn drive_loader(loader: &mut LevelLoader, world: &mut World) -> LoadProgress {
    match loader.poll() {
        None => LoadProgress::Pending,
        Some(LoaderEvent::StageChanged(stage)) => {
            log::debug!("Level loader: {:?}", stage);
            world.notifier().status(format!("Loading ({:?})", stage));
            LoadProgress::Pending
        }
        Some(LoaderEvent::Attach(level)) => {
            let name = level.name.clone();
            world.attach_level(level);
            loader.attached();
            LoadProgress::Ready(name)
        }
        Some(LoaderEvent::Failed(e)) => {
            log::error!("Level load failed: {}", e);
            world.notifier().status(format!("Level load failed: {}", e));
            LoadProgress::Failed
        }
        Some(LoaderEvent::Unloaded) => LoadProgress::Unloaded,
    }
}
