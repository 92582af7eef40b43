use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{LotSnapshot, OrderStatus, SettlementStatus};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::product_lots)]
pub struct ProductLot {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub unit: String,
    pub price_per_unit: bigdecimal::BigDecimal,
    pub quantity_available: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ProductLot {
    pub fn snapshot(&self) -> LotSnapshot {
        LotSnapshot {
            id: self.id,
            seller_id: self.seller_id,
            name: self.name.clone(),
            unit: self.unit.clone(),
            price_per_unit: self.price_per_unit.clone(),
            quantity_available: self.quantity_available,
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub total_price: bigdecimal::BigDecimal,
    pub status: String,
    pub pickup_code: Option<String>,
    pub reservation_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Rows hold the status as text; unknown values are treated as terminal
    /// so a bad row can never be picked up, cancelled or expired.
    pub fn status(&self) -> OrderStatus {
        OrderStatus::parse(&self.status).unwrap_or(OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub total_price: bigdecimal::BigDecimal,
    pub status: String,
    pub pickup_code: Option<String>,
    pub reservation_expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::transactions)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub seller_id: Uuid,
    pub amount: bigdecimal::BigDecimal,
    pub status: String,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SettlementRecord {
    pub fn status(&self) -> Option<SettlementStatus> {
        SettlementStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::transactions)]
pub struct NewSettlementRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub seller_id: Uuid,
    pub amount: bigdecimal::BigDecimal,
    pub status: String,
    pub available_at: DateTime<Utc>,
}
