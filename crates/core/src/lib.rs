pub mod error;
pub mod generic_types;
pub mod protocol;
pub mod realtime_api;
pub mod relay;
pub mod session_state;
pub mod turn_state;

pub use error::{ConnectError, RelayError, SendError};
pub use generic_types::{SessionConfig, UpstreamEvent};
pub use protocol::{ClientCommand, ClientFrame, RelayMessage, StartConfig};
pub use realtime_api::{Connection, RealtimeApi, RealtimeConnector};
pub use relay::SessionRelay;
pub use session_state::{Lifecycle, Session, SessionDefaults};
pub use turn_state::{TurnEvent, TurnPhase, TurnState, TurnStateMachine};
