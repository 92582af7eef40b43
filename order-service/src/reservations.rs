use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rand::Rng;
use shared::{
    reservation_expiry_from, OrderError, OrderStatus, PICKUP_CODE_LEN, PICKUP_CODE_MAX_RETRIES,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{NewOrder, Order, ProductLot};
use crate::schema::{orders, product_lots};

const PICKUP_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn generate_pickup_code<R: Rng>(rng: &mut R) -> String {
    (0..PICKUP_CODE_LEN)
        .map(|_| PICKUP_CODE_CHARSET[rng.gen_range(0..PICKUP_CODE_CHARSET.len())] as char)
        .collect()
}

/// Picks a pickup code that no currently-reserved order is using. Collisions
/// with completed/cancelled/expired orders are fine; those codes are inert.
async fn unique_pickup_code(conn: &mut AsyncPgConnection) -> Result<String, OrderError> {
    for _ in 0..PICKUP_CODE_MAX_RETRIES {
        // ThreadRng is not Send, so it must not be held across the await below.
        let code = generate_pickup_code(&mut rand::thread_rng());
        let taken = diesel::select(diesel::dsl::exists(
            orders::table
                .filter(orders::status.eq(OrderStatus::Reserved.as_str()))
                .filter(orders::pickup_code.eq(&code)),
        ))
        .get_result::<bool>(conn)
        .await?;
        if !taken {
            return Ok(code);
        }
    }
    Err(OrderError::CodeGenerationFailed)
}

/// Reserves `quantity` units of a lot for a buyer.
///
/// The stock check, the decrement and the order insert run in one database
/// transaction; the decrement is a conditional update keyed on
/// `quantity_available >= quantity`, so two reservations racing over the last
/// units can never both commit.
pub async fn reserve(
    conn: &mut AsyncPgConnection,
    buyer_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> Result<Order, OrderError> {
    if quantity <= 0 {
        return Err(OrderError::InvalidQuantity);
    }

    let order = conn
        .transaction::<Order, OrderError, _>(|conn| {
            Box::pin(async move {
                let claimed = diesel::update(
                    product_lots::table
                        .filter(product_lots::id.eq(product_id))
                        .filter(product_lots::is_active.eq(true))
                        .filter(product_lots::quantity_available.ge(quantity)),
                )
                .set(
                    product_lots::quantity_available
                        .eq(product_lots::quantity_available - quantity),
                )
                .get_result::<ProductLot>(conn)
                .await
                .optional()?;

                let lot = match claimed {
                    Some(lot) => lot,
                    // The conditional update matched nothing; look at the lot
                    // to report which precondition failed. Erroring here rolls
                    // the transaction back.
                    None => {
                        let lot = product_lots::table
                            .filter(product_lots::id.eq(product_id))
                            .first::<ProductLot>(conn)
                            .await
                            .optional()?
                            .ok_or(OrderError::NotFound("lot"))?;
                        if !lot.is_active {
                            return Err(OrderError::LotInactive);
                        }
                        return Err(OrderError::InsufficientStock);
                    }
                };

                let pickup_code = unique_pickup_code(conn).await?;
                let now = Utc::now();
                let new_order = NewOrder {
                    id: Uuid::new_v4(),
                    buyer_id,
                    product_id,
                    quantity,
                    total_price: &lot.price_per_unit * BigDecimal::from(quantity),
                    status: OrderStatus::Reserved.as_str().to_string(),
                    pickup_code: Some(pickup_code),
                    reservation_expiry: Some(reservation_expiry_from(now)),
                };

                // The partial unique index on reserved pickup codes backstops
                // the generate-and-check above; two reservations racing onto
                // the same code surface here as a retryable failure.
                let order = diesel::insert_into(orders::table)
                    .values(&new_order)
                    .get_result::<Order>(conn)
                    .await
                    .map_err(|e| match e {
                        diesel::result::Error::DatabaseError(
                            diesel::result::DatabaseErrorKind::UniqueViolation,
                            _,
                        ) => OrderError::CodeGenerationFailed,
                        other => other.into(),
                    })?;

                Ok(order)
            })
        })
        .await?;

    info!(
        "Reserved {} x lot {} for buyer {} as order {}",
        quantity, product_id, buyer_id, order.id
    );
    Ok(order)
}

pub async fn get_order(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
) -> Result<Order, OrderError> {
    orders::table
        .filter(orders::id.eq(order_id))
        .first::<Order>(conn)
        .await
        .optional()?
        .ok_or(OrderError::NotFound("order"))
}

/// Cancels a reservation and puts its quantity back on the lot. Only the buyer
/// or an operator may cancel, and only while the order is still `reserved`;
/// a cancel racing a pickup loses cleanly with `InvalidState`.
pub async fn cancel(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    actor_id: Uuid,
    actor_is_operator: bool,
) -> Result<Order, OrderError> {
    let order = conn
        .transaction::<Order, OrderError, _>(|conn| {
            Box::pin(async move {
                let order = orders::table
                    .filter(orders::id.eq(order_id))
                    .first::<Order>(conn)
                    .await
                    .optional()?
                    .ok_or(OrderError::NotFound("order"))?;

                if order.buyer_id != actor_id && !actor_is_operator {
                    return Err(OrderError::Unauthorized);
                }

                // Test-and-set on the status; losing the race to a pickup or
                // the expiry sweep surfaces as InvalidState.
                let cancelled = diesel::update(
                    orders::table
                        .filter(orders::id.eq(order_id))
                        .filter(orders::status.eq(OrderStatus::Reserved.as_str())),
                )
                .set((
                    orders::status.eq(OrderStatus::Cancelled.as_str()),
                    orders::reservation_expiry.eq(None::<chrono::DateTime<Utc>>),
                ))
                .get_result::<Order>(conn)
                .await
                .optional()?
                .ok_or(OrderError::InvalidState)?;

                restore_lot_quantity(conn, cancelled.product_id, cancelled.quantity).await?;

                Ok(cancelled)
            })
        })
        .await?;

    info!("Order {} cancelled by {}", order.id, actor_id);
    Ok(order)
}

/// Sweeps reservations whose expiry has passed, expiring each in its own
/// transaction so one bad row cannot block the rest of the batch.
pub async fn expire_stale_reservations(
    conn: &mut AsyncPgConnection,
) -> Result<usize, OrderError> {
    let now = Utc::now();
    let stale: Vec<Uuid> = orders::table
        .filter(orders::status.eq(OrderStatus::Reserved.as_str()))
        .filter(orders::reservation_expiry.lt(now))
        .select(orders::id)
        .load(conn)
        .await?;

    let mut expired = 0;
    for order_id in stale {
        match expire_one(conn, order_id).await {
            Ok(true) => expired += 1,
            // Completed or cancelled between the scan and the test-and-set.
            Ok(false) => {}
            Err(e) => warn!("Failed to expire order {}: {}", order_id, e),
        }
    }

    if expired > 0 {
        info!("Expired {} stale reservations", expired);
    }
    Ok(expired)
}

async fn expire_one(conn: &mut AsyncPgConnection, order_id: Uuid) -> Result<bool, OrderError> {
    conn.transaction::<bool, OrderError, _>(|conn| {
        Box::pin(async move {
            let now = Utc::now();
            let expired = diesel::update(
                orders::table
                    .filter(orders::id.eq(order_id))
                    .filter(orders::status.eq(OrderStatus::Reserved.as_str()))
                    .filter(orders::reservation_expiry.lt(now)),
            )
            .set((
                orders::status.eq(OrderStatus::Expired.as_str()),
                orders::reservation_expiry.eq(None::<chrono::DateTime<Utc>>),
            ))
            .get_result::<Order>(conn)
            .await
            .optional()?;

            match expired {
                Some(order) => {
                    restore_lot_quantity(conn, order.product_id, order.quantity).await?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    })
    .await
}

async fn restore_lot_quantity(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), OrderError> {
    diesel::update(product_lots::table.filter(product_lots::id.eq(product_id)))
        .set(product_lots::quantity_available.eq(product_lots::quantity_available + quantity))
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn pickup_codes_are_six_uppercase_alphanumerics() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let code = generate_pickup_code(&mut rng);
            assert_eq!(code.len(), PICKUP_CODE_LEN);
            assert!(code
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn pickup_codes_vary() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = generate_pickup_code(&mut rng);
        let b = generate_pickup_code(&mut rng);
        assert_ne!(a, b);
    }
}
