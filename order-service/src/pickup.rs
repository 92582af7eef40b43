use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{pickup_codes_match, OrderError, OrderStatus};
use tracing::info;
use uuid::Uuid;

use crate::models::Order;
use crate::schema::{orders, product_lots};
use crate::settlement;

/// Hands a reserved order over to its buyer and opens the escrow hold.
///
/// The `reserved -> completed` flip is a conditional update, so when two
/// pickup attempts (or a pickup and the expiry sweep) race, exactly one
/// transition commits. The settlement hold is written in the same database
/// transaction as the flip.
///
/// Retry-safe: presenting the correct code against an order this call already
/// completed returns that order again instead of erroring, so a client that
/// lost the first response can safely resend. A wrong code never succeeds.
pub async fn complete_pickup(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    presented_code: &str,
) -> Result<Order, OrderError> {
    let presented = presented_code.to_string();
    let order = conn
        .transaction::<Order, OrderError, _>(|conn| {
            Box::pin(async move {
                let order = orders::table
                    .filter(orders::id.eq(order_id))
                    .first::<Order>(conn)
                    .await
                    .optional()?
                    .ok_or(OrderError::NotFound("order"))?;

                match order.status() {
                    OrderStatus::Completed => replay_completed(order, &presented),
                    OrderStatus::Reserved => {
                        let stored = order.pickup_code.as_deref().unwrap_or_default();
                        if !pickup_codes_match(stored, &presented) {
                            return Err(OrderError::CodeMismatch);
                        }

                        let flipped = diesel::update(
                            orders::table
                                .filter(orders::id.eq(order_id))
                                .filter(orders::status.eq(OrderStatus::Reserved.as_str())),
                        )
                        .set((
                            orders::status.eq(OrderStatus::Completed.as_str()),
                            orders::reservation_expiry.eq(None::<DateTime<Utc>>),
                        ))
                        .get_result::<Order>(conn)
                        .await
                        .optional()?;

                        match flipped {
                            Some(completed) => {
                                let seller_id = product_lots::table
                                    .filter(product_lots::id.eq(completed.product_id))
                                    .select(product_lots::seller_id)
                                    .first::<Uuid>(conn)
                                    .await?;
                                settlement::open_hold(conn, &completed, seller_id).await?;
                                Ok(completed)
                            }
                            // Lost the race between the read above and the
                            // flip. A concurrent pickup with the same code is
                            // still a success for this caller.
                            None => {
                                let current = orders::table
                                    .filter(orders::id.eq(order_id))
                                    .first::<Order>(conn)
                                    .await?;
                                if current.status() == OrderStatus::Completed {
                                    replay_completed(current, &presented)
                                } else {
                                    Err(OrderError::InvalidState)
                                }
                            }
                        }
                    }
                    _ => Err(OrderError::InvalidState),
                }
            })
        })
        .await?;

    info!("Order {} picked up", order.id);
    Ok(order)
}

/// An already-completed order replays as success only for the code that
/// completed it; anything else is a stale or bogus attempt.
fn replay_completed(order: Order, presented: &str) -> Result<Order, OrderError> {
    let stored = order.pickup_code.as_deref().unwrap_or_default();
    if pickup_codes_match(stored, presented) {
        Ok(order)
    } else {
        Err(OrderError::InvalidState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn completed_order(code: Option<&str>) -> Order {
        Order {
            id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity: 3,
            total_price: BigDecimal::from(90),
            status: OrderStatus::Completed.as_str().to_string(),
            pickup_code: code.map(String::from),
            reservation_expiry: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn replay_accepts_the_original_code_case_insensitively() {
        let order = completed_order(Some("A1B2C3"));
        let id = order.id;
        let replayed = replay_completed(order, "a1b2c3").unwrap();
        assert_eq!(replayed.id, id);
    }

    #[test]
    fn replay_rejects_a_different_code() {
        let order = completed_order(Some("A1B2C3"));
        assert!(matches!(
            replay_completed(order, "ZZZZZZ"),
            Err(OrderError::InvalidState)
        ));
    }

    #[test]
    fn replay_rejects_when_no_code_was_retained() {
        let order = completed_order(None);
        assert!(matches!(
            replay_completed(order, "A1B2C3"),
            Err(OrderError::InvalidState)
        ));
    }
}
