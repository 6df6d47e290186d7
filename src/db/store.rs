use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::ledger_common::LedgerError;
use super::models::{
    ActivationCode, Card, FrozenPointsRecord, ServicePlan, UsageRecord, Wallet,
};

/// Source of ledger transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx;

    async fn begin(&self) -> Result<Self::Tx, LedgerError>;

    /// Users whose wallet is active with auto-refill enabled. Read outside any transaction.
    async fn auto_refill_candidates(&self) -> Result<Vec<Uuid>, LedgerError>;
}

/// One open transaction. Writes become visible only on `commit`; dropping the
/// value without committing discards all of them.
#[async_trait]
pub trait LedgerTx: Send + Sized {
    async fn commit(self) -> Result<(), LedgerError>;

    // ── Wallets ──

    /// Locks and returns the wallet row.
    async fn wallet_for_update(&mut self, user_id: Uuid) -> Result<Option<Wallet>, LedgerError>;
    /// Inserts unless a wallet already exists for the user.
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), LedgerError>;
    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<(), LedgerError>;
    /// Adds to `total_points` and `available_points`. Returns false if no wallet row.
    async fn increment_points(&mut self, user_id: Uuid, points: i64) -> Result<bool, LedgerError>;
    /// Moves points from available to used. Returns false when the balance is short.
    async fn deduct_points(&mut self, user_id: Uuid, points: i64) -> Result<bool, LedgerError>;

    // ── Cards ──

    async fn cards_for_user(&mut self, user_id: Uuid) -> Result<Vec<Card>, LedgerError>;
    async fn insert_card(&mut self, card: &Card) -> Result<(), LedgerError>;

    // ── Plans and codes ──

    async fn plan(&mut self, plan_id: Uuid) -> Result<Option<ServicePlan>, LedgerError>;
    async fn insert_plan(&mut self, plan: &ServicePlan) -> Result<(), LedgerError>;
    async fn set_plan_active(&mut self, plan_id: Uuid, active: bool) -> Result<bool, LedgerError>;
    async fn activation_code_for_update(
        &mut self,
        code: &str,
    ) -> Result<Option<ActivationCode>, LedgerError>;
    async fn insert_activation_code(&mut self, code: &ActivationCode) -> Result<(), LedgerError>;
    async fn mark_code_used(
        &mut self,
        code: &str,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    // ── Frozen points ──

    async fn open_frozen_records(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<FrozenPointsRecord>, LedgerError>;
    async fn frozen_records(&mut self, user_id: Uuid)
    -> Result<Vec<FrozenPointsRecord>, LedgerError>;
    async fn insert_frozen_record(&mut self, record: &FrozenPointsRecord)
    -> Result<(), LedgerError>;
    async fn mark_frozen_restored(
        &mut self,
        record_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    // ── Usage ──

    async fn daily_usage(&mut self, user_id: Uuid, date: NaiveDate) -> Result<i64, LedgerError>;
    async fn add_daily_usage(
        &mut self,
        user_id: Uuid,
        date: NaiveDate,
        points: i64,
    ) -> Result<(), LedgerError>;
    async fn insert_usage_record(&mut self, record: &UsageRecord) -> Result<(), LedgerError>;

    /// Open frozen record for one card, if any.
    async fn open_frozen_record(
        &mut self,
        user_id: Uuid,
        code: &str,
    ) -> Result<Option<FrozenPointsRecord>, LedgerError> {
        let open = self.open_frozen_records(user_id).await?;
        Ok(open.into_iter().find(|r| r.banned_activation_code == code))
    }
}
