use async_trait::async_trait;

use crate::entities::UserId;

/// Atomic per-user storage counters with a tier-bounded reservation check.
///
/// `reserve` is the synchronization primitive for all quota accounting: it
/// must be a single conditional update so that concurrent reservations
/// serialize in the database without application locks.
#[async_trait]
pub trait QuotaLedger {
    type Error;

    /// Debits `amount` iff `used_bytes + amount` stays within the tier
    /// limit; fails with `QuotaExceeded` otherwise.
    async fn reserve(&mut self, user_id: &UserId, amount: i64) -> Result<(), Self::Error>;

    /// Credits `amount` back, clamping at zero; compensation paths may
    /// over-release.
    async fn release(&mut self, user_id: &UserId, amount: i64) -> Result<(), Self::Error>;

    /// Signed form: positive deltas reserve, negative deltas release.
    async fn adjust(&mut self, user_id: &UserId, delta: i64) -> Result<(), Self::Error>
    where
        Self: Send,
    {
        if delta > 0 {
            self.reserve(user_id, delta).await
        } else if delta < 0 {
            self.release(user_id, -delta).await
        } else {
            Ok(())
        }
    }
}
