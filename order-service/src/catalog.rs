use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{LotSnapshot, OrderError};
use uuid::Uuid;

use crate::models::ProductLot;
use crate::schema::product_lots;

/// Read-only lot lookup. Reservation validation goes through [`crate::reservations::reserve`]
/// instead, which re-checks everything under the row lock; this view is for display
/// and pre-flight checks only.
pub async fn get_available_lot(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
) -> Result<LotSnapshot, OrderError> {
    let lot = product_lots::table
        .filter(product_lots::id.eq(product_id))
        .first::<ProductLot>(conn)
        .await
        .optional()?
        .ok_or(OrderError::NotFound("lot"))?;

    Ok(lot.snapshot())
}
