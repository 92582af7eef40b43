use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// How long a reservation holds stock before the sweep reclaims it.
pub const RESERVATION_TTL_DAYS: i64 = 7;
/// Escrow maturation delay between pickup and the earliest possible clearing.
pub const SETTLEMENT_MATURITY_HOURS: i64 = 24;
pub const PICKUP_CODE_LEN: usize = 6;
pub const PICKUP_CODE_MAX_RETRIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Reserved,
    Confirmed,
    Completed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Reserved => "reserved",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "reserved" => Some(OrderStatus::Reserved),
            "confirmed" => Some(OrderStatus::Confirmed),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            "expired" => Some(OrderStatus::Expired),
            _ => None,
        }
    }

    /// Pickup, cancellation and expiry are all gated on the order still
    /// holding stock, which is true only while it is `reserved`.
    pub fn holds_stock(&self) -> bool {
        matches!(self, OrderStatus::Reserved)
    }

    /// No further transition may ever leave these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Held,
    Cleared,
    Refunded,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Held => "held",
            SettlementStatus::Cleared => "cleared",
            SettlementStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<SettlementStatus> {
        match s {
            "held" => Some(SettlementStatus::Held),
            "cleared" => Some(SettlementStatus::Cleared),
            "refunded" => Some(SettlementStatus::Refunded),
            _ => None,
        }
    }
}

/// Read-only view of a product lot served by the catalog reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotSnapshot {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub unit: String,
    pub price_per_unit: BigDecimal,
    pub quantity_available: i32,
    pub is_active: bool,
}

/// Seller payout view: cleared funds are withdrawable, held funds sit in escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerBalance {
    pub seller_id: Uuid,
    pub available: BigDecimal,
    pub escrow: BigDecimal,
}

pub fn reservation_expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(RESERVATION_TTL_DAYS)
}

pub fn settlement_maturity_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::hours(SETTLEMENT_MATURITY_HOURS)
}

/// Pickup codes are compared case-insensitively and ignoring surrounding
/// whitespace, so a code retyped from a receipt still verifies.
pub fn pickup_codes_match(stored: &str, presented: &str) -> bool {
    stored.trim().eq_ignore_ascii_case(presented.trim())
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("quantity must be a positive whole number")]
    InvalidQuantity,
    #[error("requested quantity exceeds the lot's available stock")]
    InsufficientStock,
    #[error("lot is not accepting reservations")]
    LotInactive,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("operation is not valid for the entity's current state")]
    InvalidState,
    #[error("pickup code does not match")]
    CodeMismatch,
    #[error("actor is not permitted to perform this operation")]
    Unauthorized,
    #[error("hold has not matured yet")]
    NotMature,
    #[error("could not generate a unique pickup code")]
    CodeGenerationFailed,
    #[error("storage error: {0}")]
    Storage(String),
}

impl OrderError {
    /// Stable machine-readable discriminator carried in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::InvalidQuantity => "InvalidQuantity",
            OrderError::InsufficientStock => "InsufficientStock",
            OrderError::LotInactive => "LotInactive",
            OrderError::NotFound(_) => "NotFound",
            OrderError::InvalidState => "InvalidState",
            OrderError::CodeMismatch => "CodeMismatch",
            OrderError::Unauthorized => "Unauthorized",
            OrderError::NotMature => "NotMature",
            OrderError::CodeGenerationFailed => "CodeGenerationFailed",
            OrderError::Storage(_) => "Internal",
        }
    }
}

impl From<diesel::result::Error> for OrderError {
    fn from(e: diesel::result::Error) -> Self {
        OrderError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Reserved,
            OrderStatus::Confirmed,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
            OrderStatus::Expired,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("shipped"), None);
    }

    #[test]
    fn only_reserved_orders_hold_stock() {
        assert!(OrderStatus::Reserved.holds_stock());
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
            OrderStatus::Expired,
        ] {
            assert!(!status.holds_stock());
        }
    }

    #[test]
    fn terminal_states_are_exactly_the_immutable_ones() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Reserved.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn settlement_status_round_trips() {
        for status in [
            SettlementStatus::Held,
            SettlementStatus::Cleared,
            SettlementStatus::Refunded,
        ] {
            assert_eq!(SettlementStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SettlementStatus::parse("released"), None);
    }

    #[test]
    fn pickup_code_match_is_case_insensitive() {
        assert!(pickup_codes_match("A1B2C3", "a1b2c3"));
        assert!(pickup_codes_match("A1B2C3", " A1B2C3 "));
        assert!(!pickup_codes_match("A1B2C3", "A1B2C4"));
        assert!(!pickup_codes_match("A1B2C3", ""));
    }

    #[test]
    fn expiry_and_maturity_offsets() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            reservation_expiry_from(now),
            Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap()
        );
        assert_eq!(
            settlement_maturity_from(now),
            Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(OrderError::InsufficientStock.kind(), "InsufficientStock");
        assert_eq!(OrderError::NotFound("order").kind(), "NotFound");
        assert_eq!(OrderError::Storage("boom".into()).kind(), "Internal");
        assert_eq!(OrderError::NotFound("order").to_string(), "order not found");
    }
}
