use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::dsl::sum;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{settlement_maturity_from, OrderError, SellerBalance, SettlementStatus};
use tracing::info;
use uuid::Uuid;

use crate::models::{NewSettlementRecord, Order, SettlementRecord};
use crate::schema::transactions;

/// Opens the escrow hold for a completed order. Called by the pickup verifier
/// inside the completion transaction; the unique constraint on `order_id`
/// guarantees at most one ledger entry per order even if a bug ever called
/// this twice.
pub async fn open_hold(
    conn: &mut AsyncPgConnection,
    order: &Order,
    seller_id: Uuid,
) -> Result<SettlementRecord, OrderError> {
    let record = NewSettlementRecord {
        id: Uuid::new_v4(),
        order_id: order.id,
        seller_id,
        amount: order.total_price.clone(),
        status: SettlementStatus::Held.as_str().to_string(),
        available_at: settlement_maturity_from(Utc::now()),
    };

    let record = diesel::insert_into(transactions::table)
        .values(&record)
        .get_result::<SettlementRecord>(conn)
        .await?;

    info!(
        "Opened hold {} of {} for seller {} (order {})",
        record.id, record.amount, seller_id, order.id
    );
    Ok(record)
}

/// Releases a matured hold to the seller's withdrawable balance. The update is
/// conditioned on `held` status and passed maturity, so an early or repeated
/// clear never commits.
pub async fn clear(
    conn: &mut AsyncPgConnection,
    transaction_id: Uuid,
) -> Result<SettlementRecord, OrderError> {
    let now = Utc::now();
    let cleared = diesel::update(
        transactions::table
            .filter(transactions::id.eq(transaction_id))
            .filter(transactions::status.eq(SettlementStatus::Held.as_str()))
            .filter(transactions::available_at.le(now)),
    )
    .set(transactions::status.eq(SettlementStatus::Cleared.as_str()))
    .get_result::<SettlementRecord>(conn)
    .await
    .optional()?;

    match cleared {
        Some(record) => {
            info!("Cleared hold {} for seller {}", record.id, record.seller_id);
            Ok(record)
        }
        None => Err(diagnose_failed_release(conn, transaction_id, true).await?),
    }
}

/// Returns a held amount to the buyer's side of the ledger. Dispute and
/// operator-override recovery path; permitted only while the hold is `held`.
pub async fn refund(
    conn: &mut AsyncPgConnection,
    transaction_id: Uuid,
) -> Result<SettlementRecord, OrderError> {
    let refunded = diesel::update(
        transactions::table
            .filter(transactions::id.eq(transaction_id))
            .filter(transactions::status.eq(SettlementStatus::Held.as_str())),
    )
    .set(transactions::status.eq(SettlementStatus::Refunded.as_str()))
    .get_result::<SettlementRecord>(conn)
    .await
    .optional()?;

    match refunded {
        Some(record) => {
            info!("Refunded hold {} (order {})", record.id, record.order_id);
            Ok(record)
        }
        None => Err(diagnose_failed_release(conn, transaction_id, false).await?),
    }
}

/// Works out why a conditional release matched nothing: missing row, a hold
/// that is not `held` any more, or (for clears) a hold that has not matured.
async fn diagnose_failed_release(
    conn: &mut AsyncPgConnection,
    transaction_id: Uuid,
    maturity_gated: bool,
) -> Result<OrderError, OrderError> {
    let record = transactions::table
        .filter(transactions::id.eq(transaction_id))
        .first::<SettlementRecord>(conn)
        .await
        .optional()?;

    Ok(match record {
        None => OrderError::NotFound("transaction"),
        Some(record) => {
            if record.status() == Some(SettlementStatus::Held)
                && maturity_gated
                && Utc::now() < record.available_at
            {
                OrderError::NotMature
            } else {
                OrderError::InvalidState
            }
        }
    })
}

pub async fn seller_transactions(
    conn: &mut AsyncPgConnection,
    seller_id: Uuid,
) -> Result<Vec<SettlementRecord>, OrderError> {
    let records = transactions::table
        .filter(transactions::seller_id.eq(seller_id))
        .order(transactions::created_at.desc())
        .load::<SettlementRecord>(conn)
        .await?;
    Ok(records)
}

/// Cleared funds are withdrawable; held funds are still in escrow.
pub async fn seller_balance(
    conn: &mut AsyncPgConnection,
    seller_id: Uuid,
) -> Result<SellerBalance, OrderError> {
    let available = sum_for_status(conn, seller_id, SettlementStatus::Cleared).await?;
    let escrow = sum_for_status(conn, seller_id, SettlementStatus::Held).await?;
    Ok(SellerBalance {
        seller_id,
        available,
        escrow,
    })
}

async fn sum_for_status(
    conn: &mut AsyncPgConnection,
    seller_id: Uuid,
    status: SettlementStatus,
) -> Result<BigDecimal, OrderError> {
    let total: Option<BigDecimal> = transactions::table
        .filter(transactions::seller_id.eq(seller_id))
        .filter(transactions::status.eq(status.as_str()))
        .select(sum(transactions::amount))
        .first(conn)
        .await?;
    Ok(total.unwrap_or_else(|| BigDecimal::from(0)))
}
