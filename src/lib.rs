//! # Aviator Crash Server
//!
//! Authoritative server for a repeating "crash" betting round: a betting
//! window, a flight during which the multiplier climbs to a pre-drawn crash
//! point, and a settlement. Clients bet, watch the multiplier and cash out
//! over WebSocket; a reconciliation worker credits external deposits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      AVIATOR SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── money.rs    - Decimal payout and unit conversion        │
//! │  ├── rng.rs      - Xorshift128+ crash point draws            │
//! │  ├── hash.rs     - Crash point commitments                   │
//! │  └── env.rs      - Environment config parsing                │
//! │                                                              │
//! │  game/           - Round logic (in-memory, no I/O)           │
//! │  ├── state.rs    - User ids and round state                  │
//! │  ├── ledger.rs   - Balances                                  │
//! │  ├── dedup.rs    - Processed payment ids                     │
//! │  ├── bets.rs     - Bets of the current round                 │
//! │  ├── table.rs    - The single lock unit                      │
//! │  ├── tick.rs     - Authoritative round state machine         │
//! │  ├── events.rs   - Round events and settlements              │
//! │  └── snapshot.rs - Ledger persistence                        │
//! │                                                              │
//! │  payments/       - External deposits                         │
//! │  ├── memo.rs     - Recipient memo parsing                    │
//! │  ├── provider.rs - Payment provider client                   │
//! │  └── reconcile.rs- Exactly-once crediting                    │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server and background loops     │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── hub.rs      - Round event fan-out                       │
//! │  ├── auth.rs     - JWT validation                            │
//! │  └── locale.rs   - Localized messages                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Round state, balances, processed payments and bets live in one
//! [`game::Table`] behind one lock:
//! - A cashout and the crash sweep never both settle the same bet
//! - A payment id is credited at most once, across passes and restarts
//! - No floating point in balance math
//!
//! The round engine holds the lock only for each in-memory transition and
//! publishes events after releasing it, so slow observers never stall rounds.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod payments;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::state::{RoundPhase, UserId};
pub use game::table::{Table, TableError};
pub use game::tick::{RoundConfig, RoundEngine};
pub use network::server::{CrashServer, ServerConfig};
pub use payments::reconcile::{ReconcileConfig, Reconciler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
