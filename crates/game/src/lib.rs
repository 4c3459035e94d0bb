pub mod assets;
pub mod clock;
pub mod config;
pub mod control;
pub mod effects;
pub mod level;
pub mod message;
pub mod net;
pub mod notify;
pub mod physics;
pub mod player;
pub mod registry;
pub mod session;
pub mod sync;
pub mod types;
pub mod world;

pub use assets::{AssetCatalog, AssetError, AssetSource, ModelDesc};
pub use clock::{DEFAULT_SYNC_RATE, DEFAULT_TICK_RATE, FixedTimestep, ReplicationClock};
pub use config::{PlayerRemovalPolicy, WorldConfig};
pub use control::{ControlAssignment, ControlInput};
pub use level::{LevelData, LevelLoader, LoadStage, NavMesh};
pub use message::{Message, MessageKind};
pub use net::{
    DEFAULT_PORT, Inbound, MemoryHub, NetLink, NetworkPump, Target, Transport, TransportError,
    UdpClientTransport, UdpServerTransport, link,
};
pub use notify::{Notification, Notifier, PlayerSummary};
pub use physics::{BodyKind, PhysicsSpace, RapierSpace};
pub use session::{ClientConfig, ClientSession, ServerConfig, ServerSession};
pub use sync::{SyncId, SyncManager};
pub use types::{AiKind, ClientId, EntityId, GroupId, Peer, PlayerId, Role};
pub use world::{World, WorldError, WorldEvent};
