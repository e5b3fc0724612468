//! Network Layer
//!
//! WebSocket server, wire protocol and live event fan-out.
//! All game rules live in `game/`; this layer only routes requests to
//! the shared table and publishes what the round engine emits.

pub mod auth;
pub mod hub;
pub mod locale;
pub mod protocol;
pub mod server;

pub use auth::{authorize, validate_token, AuthConfig, AuthError, TokenClaims};
pub use hub::{ObserverHub, ObserverId};
pub use locale::Locale;
pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use server::{run_round_loop, save_snapshot, CrashServer, GameServerError, ServerConfig};
