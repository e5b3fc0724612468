//! Localized Messages
//!
//! Rejections and success notices in the languages the deployment serves.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::network::protocol::{ErrorCode, Notice};

/// Message language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    /// English.
    #[default]
    En,
    /// Kazakh.
    Kk,
}

impl Locale {
    /// Text for a rejection code.
    pub fn rejection(self, code: ErrorCode) -> &'static str {
        match self {
            Locale::En => match code {
                ErrorCode::InvalidAmount => "Amount must be positive",
                ErrorCode::AmountTooLarge => "Amount is too large",
                ErrorCode::InsufficientFunds => "Insufficient balance",
                ErrorCode::BettingClosed => "Bets are not accepted right now",
                ErrorCode::DuplicateBet => "You already have a bet in this round",
                ErrorCode::NoActiveBet => "No active bet",
                ErrorCode::NotInFlight => "The round has not taken off yet",
                ErrorCode::TooLate => "Too late, the plane has crashed",
                ErrorCode::AlreadyCashedOut => "Bet already cashed out",
                ErrorCode::InvalidAutoCashout => "Auto-cashout must be above 1.00",
                ErrorCode::UserNotFound => "User not found",
                ErrorCode::ProviderUnavailable => "Payment provider unavailable, try again later",
                ErrorCode::ReconciliationDisabled => "Payment checks are disabled",
                ErrorCode::NotAuthenticated => "Say hello first",
                ErrorCode::AuthFailed => "Authentication failed",
                ErrorCode::TokenExpired => "Session expired, sign in again",
                ErrorCode::InvalidInput => "Malformed request",
            },
            Locale::Kk => match code {
                ErrorCode::InvalidAmount => "Сома оң сан болуы керек",
                ErrorCode::AmountTooLarge => "Сома тым үлкен",
                ErrorCode::InsufficientFunds => "Жеткілікті баланс жоқ",
                ErrorCode::BettingClosed => "Қазір ставка қабылданбайды",
                ErrorCode::DuplicateBet => "Бұл раундта ставка жасалып қойған",
                ErrorCode::NoActiveBet => "Ставка табылмады",
                ErrorCode::NotInFlight => "Раунд әлі басталған жоқ",
                ErrorCode::TooLate => "Кеш қалдыңыз, ұшақ құлады",
                ErrorCode::AlreadyCashedOut => "Ұтыс бұрын алынған",
                ErrorCode::InvalidAutoCashout => "Авто-кэшаут 1.00-ден жоғары болуы керек",
                ErrorCode::UserNotFound => "Пайдаланушы табылмады",
                ErrorCode::ProviderUnavailable => "Төлем жүйесі қолжетімсіз, кейінірек көріңіз",
                ErrorCode::ReconciliationDisabled => "Төлемдерді тексеру өшірулі",
                ErrorCode::NotAuthenticated => "Алдымен сәлемдесіңіз",
                ErrorCode::AuthFailed => "Аутентификация сәтсіз",
                ErrorCode::TokenExpired => "Сессия мерзімі бітті, қайта кіріңіз",
                ErrorCode::InvalidInput => "Сұраныс пішімі қате",
            },
        }
    }

    /// Text for a success notice.
    pub fn notice(self, notice: Notice) -> String {
        match (self, notice) {
            (Locale::En, Notice::ToppedUp) => "Balance topped up".to_string(),
            (Locale::En, Notice::BetAccepted) => "Bet accepted".to_string(),
            (Locale::En, Notice::CashedOut { payout }) => format!("Cashout successful! Won: {}", payout),
            (Locale::En, Notice::Reconciled) => "Payments checked".to_string(),
            (Locale::Kk, Notice::ToppedUp) => "Баланс толықтырылды".to_string(),
            (Locale::Kk, Notice::BetAccepted) => "Ставка қабылданды".to_string(),
            (Locale::Kk, Notice::CashedOut { payout }) => format!("Кэшаут сәтті! Ұтыс: {}", payout),
            (Locale::Kk, Notice::Reconciled) => "Төлемдер тексерілді".to_string(),
        }
    }

    /// Language tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Kk => "kk",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "kk" | "kz" => Ok(Locale::Kk),
            other => Err(format!("unknown locale {:?}", other)),
        }
    }
}
