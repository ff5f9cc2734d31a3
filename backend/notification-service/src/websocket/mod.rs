/// WebSocket real-time notification system
///
/// Architecture:
/// 1. ConnectionRegistry: one live connection per user plus its group memberships
/// 2. RealtimeGateway: connect/disconnect lifecycle, group join/leave, push primitives
/// 3. WsSession: actix actor bridging a socket to the gateway, with heartbeat
/// 4. ConnectionReaper: evicts sessions that vanished without a disconnect

pub mod gateway;
pub mod groups;
pub mod messages;
pub mod reaper;
pub mod registry;
pub mod session;

pub use gateway::{PushOutcome, RealtimeGateway};
pub use groups::GroupKey;
pub use messages::{ClientCommand, ServerEvent};
pub use reaper::ConnectionReaper;
pub use registry::{ConnectionId, ConnectionRegistry, EventSender};
pub use session::WsSession;
