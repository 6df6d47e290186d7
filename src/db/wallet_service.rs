use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::ledger_common::{LedgerError, require_positive};
use super::models::Wallet;
use super::store::{LedgerStore, LedgerTx};

// ── Transaction-scoped operations ────────────────────────────────────────────
//
// Other services compose these inside their own transactions.

/// Returns the locked wallet, creating an empty expired one on first use.
pub async fn get_or_create_in<T: LedgerTx>(
    tx: &mut T,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Wallet, LedgerError> {
    if let Some(wallet) = tx.wallet_for_update(user_id).await? {
        return Ok(wallet);
    }
    tx.insert_wallet(&Wallet::empty(user_id, now)).await?;
    // Re-read: a concurrent creator may have won the insert.
    tx.wallet_for_update(user_id)
        .await?
        .ok_or_else(|| LedgerError::Storage(format!("wallet for {user_id} not visible after insert")))
}

pub async fn increment_in<T: LedgerTx>(
    tx: &mut T,
    user_id: Uuid,
    points: i64,
    now: DateTime<Utc>,
) -> Result<Wallet, LedgerError> {
    let wallet = get_or_create_in(tx, user_id, now).await?;
    if points <= 0 {
        return Ok(wallet);
    }
    if !tx.increment_points(user_id, points).await? {
        return Err(LedgerError::Storage(format!("wallet {user_id} vanished")));
    }
    reload(tx, user_id).await
}

pub async fn deduct_in<T: LedgerTx>(
    tx: &mut T,
    user_id: Uuid,
    points: i64,
    now: DateTime<Utc>,
) -> Result<Wallet, LedgerError> {
    require_positive("points", points)?;
    let wallet = get_or_create_in(tx, user_id, now).await?;
    if wallet.available_points < points {
        return Err(LedgerError::InsufficientBalance {
            available: wallet.available_points,
            requested: points,
        });
    }
    if !tx.deduct_points(user_id, points).await? {
        return Err(LedgerError::InsufficientBalance {
            available: wallet.available_points,
            requested: points,
        });
    }
    reload(tx, user_id).await
}

/// Writes a wallet back after checking the point invariant.
pub async fn save_in<T: LedgerTx>(tx: &mut T, wallet: &Wallet) -> Result<(), LedgerError> {
    wallet.ensure_balanced()?;
    tx.update_wallet(wallet).await
}

async fn reload<T: LedgerTx>(tx: &mut T, user_id: Uuid) -> Result<Wallet, LedgerError> {
    let wallet = tx
        .wallet_for_update(user_id)
        .await?
        .ok_or_else(|| LedgerError::Storage(format!("wallet {user_id} vanished")))?;
    wallet.ensure_balanced()?;
    Ok(wallet)
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct WalletService<S> {
    store: Arc<S>,
}

impl<S> Clone for WalletService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: LedgerStore> WalletService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Never fails for a missing wallet; only for storage errors.
    pub async fn get_or_create(&self, user_id: Uuid) -> Result<Wallet, LedgerError> {
        let mut tx = self.store.begin().await?;
        let wallet = get_or_create_in(&mut tx, user_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    pub async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, LedgerError> {
        let mut tx = self.store.begin().await?;
        tx.wallet_for_update(user_id).await
    }

    /// Adds points to total and available. `points <= 0` is a no-op.
    pub async fn increment(&self, user_id: Uuid, points: i64) -> Result<Wallet, LedgerError> {
        let mut tx = self.store.begin().await?;
        let wallet = increment_in(&mut tx, user_id, points, Utc::now()).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    /// Moves points from available to used.
    pub async fn deduct(&self, user_id: Uuid, points: i64) -> Result<Wallet, LedgerError> {
        let mut tx = self.store.begin().await?;
        let wallet = deduct_in(&mut tx, user_id, points, Utc::now()).await?;
        tx.commit().await?;
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_store::MemoryStore;
    use crate::db::models::WalletStatus;

    fn service() -> (Arc<MemoryStore>, WalletService<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), WalletService::new(store))
    }

    #[tokio::test]
    async fn test_get_or_create_returns_empty_expired_wallet() {
        let (_, ws) = service();
        let user_id = Uuid::new_v4();
        let w = ws.get_or_create(user_id).await.unwrap();
        assert_eq!(w.user_id, user_id);
        assert_eq!((w.total_points, w.available_points, w.used_points), (0, 0, 0));
        assert_eq!(w.status, WalletStatus::Expired);

        let again = ws.get_or_create(user_id).await.unwrap();
        assert_eq!(again.id, w.id);
    }

    #[tokio::test]
    async fn test_wallet_lookup_does_not_create() {
        let (store, ws) = service();
        let user_id = Uuid::new_v4();
        assert!(ws.wallet(user_id).await.unwrap().is_none());
        assert!(store.wallet(user_id).await.is_none());
    }

    #[tokio::test]
    async fn test_increment_adds_to_total_and_available() {
        let (_, ws) = service();
        let user_id = Uuid::new_v4();
        let w = ws.increment(user_id, 40).await.unwrap();
        assert_eq!((w.total_points, w.available_points, w.used_points), (40, 40, 0));
    }

    #[tokio::test]
    async fn test_increment_non_positive_is_noop() {
        let (_, ws) = service();
        let user_id = Uuid::new_v4();
        ws.increment(user_id, 10).await.unwrap();
        let w = ws.increment(user_id, 0).await.unwrap();
        assert_eq!(w.total_points, 10);
        let w = ws.increment(user_id, -5).await.unwrap();
        assert_eq!(w.total_points, 10);
    }

    #[tokio::test]
    async fn test_deduct_moves_available_to_used() {
        let (_, ws) = service();
        let user_id = Uuid::new_v4();
        ws.increment(user_id, 100).await.unwrap();
        let w = ws.deduct(user_id, 30).await.unwrap();
        assert_eq!((w.total_points, w.available_points, w.used_points), (100, 70, 30));
        assert!(w.is_balanced());
    }

    #[tokio::test]
    async fn test_deduct_insufficient_balance_leaves_wallet_untouched() {
        let (store, ws) = service();
        let user_id = Uuid::new_v4();
        ws.increment(user_id, 20).await.unwrap();
        let err = ws.deduct(user_id, 21).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { available: 20, requested: 21 }
        ));
        let w = store.wallet(user_id).await.unwrap();
        assert_eq!((w.total_points, w.available_points, w.used_points), (20, 20, 0));
    }

    #[tokio::test]
    async fn test_deduct_rejects_non_positive() {
        let (_, ws) = service();
        let err = ws.deduct(Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
