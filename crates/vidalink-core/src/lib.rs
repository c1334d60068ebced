pub mod config;
pub mod errors;
pub mod types;

pub use config::{CallConfig, IceServer, MediaConstraints, RelayConfig, RtcConfig};
pub use errors::{CallError, PeerError, SignalingError};
pub use types::*;
