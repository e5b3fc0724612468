//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object tagged by `type`. Amounts and
//! multipliers travel as decimal strings so no precision is lost.

use rust_decimal::Decimal;
use serde::{Serialize, Deserialize};

use crate::game::events::{RoundEvent, Settlement};
use crate::game::ledger::LedgerError;
use crate::game::state::{RoundId, RoundSummary, RoundView, UserId};
use crate::game::table::TableError;
use crate::network::auth::AuthError;
use crate::network::locale::Locale;
use crate::payments::reconcile::ReconcileError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind the connection to a user and start observing rounds.
    Hello(HelloRequest),

    /// Query own balance.
    Balance,

    /// Credit own balance.
    TopUp {
        /// Positive amount.
        amount: Decimal,
    },

    /// Bet on the next flight.
    PlaceBet {
        /// Positive stake.
        amount: Decimal,
        /// Optional automatic cashout multiplier (> 1.00).
        #[serde(default)]
        auto_cashout: Option<Decimal>,
    },

    /// Cash out the active bet at the current multiplier.
    Cashout,

    /// Run a reconciliation pass now.
    Reconcile,

    /// Recent finished rounds.
    History,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Hello request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    /// Claimed user id.
    pub user_id: UserId,
    /// JWT, required when the server has authentication configured.
    #[serde(default)]
    pub token: Option<String>,
    /// Preferred message language.
    #[serde(default)]
    pub locale: Option<Locale>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Hello accepted.
    Welcome(WelcomeInfo),

    /// Live round event.
    Round(RoundEvent),

    /// Balance query result.
    Balance {
        /// Current balance.
        balance: Decimal,
    },

    /// Top-up applied.
    ToppedUp {
        /// Balance after the credit.
        balance: Decimal,
        /// Localized notice.
        message: String,
    },

    /// Bet accepted.
    BetAccepted {
        /// Round the bet flies in.
        round_id: RoundId,
        /// Stake debited.
        amount: Decimal,
        /// Balance after the debit.
        balance: Decimal,
        /// Localized notice.
        message: String,
    },

    /// Bet paid out, manually or automatically.
    CashedOut(CashoutInfo),

    /// Reconciliation pass finished.
    Reconciled {
        /// Newly credited transactions.
        applied: usize,
        /// Already processed transactions.
        duplicates: usize,
        /// Unusable transactions.
        skipped: usize,
        /// Localized notice.
        message: String,
    },

    /// Recent rounds, most recent first.
    History {
        /// Finished rounds.
        rounds: Vec<RoundSummary>,
    },

    /// Request rejected.
    Rejected(ServerError),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time in Unix milliseconds.
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Welcome information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Bound user.
    pub user_id: UserId,
    /// Server version.
    pub server_version: String,
    /// Round as of the hello.
    pub round: RoundView,
}

/// Cashout result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashoutInfo {
    /// Round the bet flew in.
    pub round_id: RoundId,
    /// Amount credited.
    pub payout: Decimal,
    /// Multiplier applied.
    pub multiplier: Decimal,
    /// Balance after the credit.
    pub balance: Decimal,
    /// Settled by auto-cashout.
    pub auto: bool,
    /// Localized notice.
    pub message: String,
}

impl CashoutInfo {
    /// Build from a settlement, localized.
    pub fn from_settlement(settlement: &Settlement, locale: Locale) -> Self {
        Self {
            round_id: settlement.round_id,
            payout: settlement.payout,
            multiplier: settlement.multiplier,
            balance: settlement.balance,
            auto: settlement.auto,
            message: locale.notice(Notice::CashedOut { payout: settlement.payout }),
        }
    }
}

/// Success notices with a localized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Top-up applied.
    ToppedUp,
    /// Bet accepted.
    BetAccepted,
    /// Cashout paid.
    CashedOut {
        /// Amount paid.
        payout: Decimal,
    },
    /// Reconciliation finished.
    Reconciled,
}

/// Rejection sent in-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Localized message.
    pub message: String,
}

impl ServerError {
    /// Rejection with the locale's text for `code`.
    pub fn localized(code: ErrorCode, locale: Locale) -> Self {
        Self {
            code,
            message: locale.rejection(code).to_string(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Amount must be positive.
    InvalidAmount,
    /// Amount over the limit.
    AmountTooLarge,
    /// Balance too low.
    InsufficientFunds,
    /// Bets are not accepted now.
    BettingClosed,
    /// Already bet this round.
    DuplicateBet,
    /// No bet to cash out.
    NoActiveBet,
    /// Bet waits for the next flight.
    NotInFlight,
    /// Round crashed first.
    TooLate,
    /// Bet already cashed out.
    AlreadyCashedOut,
    /// Auto-cashout must exceed 1.00.
    InvalidAutoCashout,
    /// Unknown user.
    UserNotFound,
    /// Payment provider failed.
    ProviderUnavailable,
    /// Reconciliation not configured.
    ReconciliationDisabled,
    /// Hello required first.
    NotAuthenticated,
    /// Authentication failed.
    AuthFailed,
    /// JWT token has expired.
    TokenExpired,
    /// Message could not be parsed.
    InvalidInput,
}

impl From<&LedgerError> for ErrorCode {
    fn from(err: &LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount => ErrorCode::InvalidAmount,
            LedgerError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            LedgerError::AmountTooLarge => ErrorCode::AmountTooLarge,
            LedgerError::UserNotFound(_) => ErrorCode::UserNotFound,
        }
    }
}

impl From<&TableError> for ErrorCode {
    fn from(err: &TableError) -> Self {
        match err {
            TableError::BettingClosed => ErrorCode::BettingClosed,
            TableError::DuplicateBet => ErrorCode::DuplicateBet,
            TableError::NoActiveBet => ErrorCode::NoActiveBet,
            TableError::NotInFlight => ErrorCode::NotInFlight,
            TableError::TooLate => ErrorCode::TooLate,
            TableError::AlreadyCashedOut => ErrorCode::AlreadyCashedOut,
            TableError::InvalidAutoCashout => ErrorCode::InvalidAutoCashout,
            TableError::Ledger(e) => e.into(),
        }
    }
}

impl From<&AuthError> for ErrorCode {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::Expired => ErrorCode::TokenExpired,
            _ => ErrorCode::AuthFailed,
        }
    }
}

impl From<&ReconcileError> for ErrorCode {
    fn from(err: &ReconcileError) -> Self {
        match err {
            ReconcileError::NotConfigured => ErrorCode::ReconciliationDisabled,
            _ => ErrorCode::ProviderUnavailable,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Localized rejection.
    pub fn rejected(code: ErrorCode, locale: Locale) -> Self {
        ServerMessage::Rejected(ServerError::localized(code, locale))
    }
}
