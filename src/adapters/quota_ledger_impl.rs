use async_trait::async_trait;
use sqlx::{Acquire, Postgres};

use crate::entities::UserId;
use crate::error::DriveError;
use crate::ports;

/// Quota accounting against the `users` row, tier-joined.
///
/// Reservation is a single conditional UPDATE so the database serializes
/// racing reservations; no application-level lock exists anywhere.
#[derive(Debug, Clone)]
pub struct QuotaLedgerImpl<A> {
    db: A,
}

impl<A> QuotaLedgerImpl<A> {
    pub fn new(db: A) -> Self {
        Self { db }
    }
}

#[async_trait]
impl<A> ports::QuotaLedger for QuotaLedgerImpl<A>
where
    A: Send + Sync,
    for<'c> &'c A: Acquire<'c, Database = Postgres>,
{
    type Error = DriveError;

    async fn reserve(&mut self, user_id: &UserId, amount: i64) -> Result<(), Self::Error> {
        let mut conn = self.db.acquire().await?;

        let result = sqlx::query(
            r#"
                UPDATE users u
                SET used_bytes = u.used_bytes + $2
                FROM tiers t
                WHERE u.id = $1
                    AND t.id = u.tier_id
                    AND u.used_bytes + $2 <= t.limit_bytes
            "#,
        )
        .bind(user_id.as_str())
        .bind(amount)
        .execute(&mut *conn)
        .await?;

        // A missing user is indistinguishable from an exhausted tier here;
        // user lifecycle belongs to the admin subsystem.
        if result.rows_affected() == 0 {
            return Err(DriveError::QuotaExceeded);
        }

        Ok(())
    }

    async fn release(&mut self, user_id: &UserId, amount: i64) -> Result<(), Self::Error> {
        let mut conn = self.db.acquire().await?;

        sqlx::query(
            r#"
                UPDATE users
                SET used_bytes = GREATEST(used_bytes - $2, 0)
                WHERE id = $1
            "#,
        )
        .bind(user_id.as_str())
        .bind(amount)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
