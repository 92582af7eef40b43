use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::AsyncPgConnection;
use std::time::Duration;
use tokio::time;
use tracing::error;

use crate::reservations;

type DbPool = Pool<AsyncPgConnection>;

/// Background task that reclaims stock from reservations whose expiry has
/// passed. Runs independently of the request path on a fixed interval.
pub struct ExpirySweeper {
    pool: DbPool,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(pool: DbPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!("Expiry sweep failed: {}", e);
            }
        }
    }

    async fn sweep_once(&self) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        reservations::expire_stale_reservations(&mut conn).await?;
        Ok(())
    }
}
