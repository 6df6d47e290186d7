use std::sync::Arc;
use uuid::Uuid;

use super::daily_usage_service::DailyUsageService;
use super::frozen_points_service::{BanPreview, FrozenPointsService};
use super::ledger_common::LedgerError;
use super::models::{FrozenPointsRecord, RequestMeta};
use super::redemption_service::{RedeemOutcome, RedemptionService};
use super::store::LedgerStore;
use super::wallet_service::WalletService;

/// The operations billing handlers call. Every call is one transaction.
pub struct PointLedger<S> {
    store: Arc<S>,
    wallets: WalletService<S>,
    redemptions: RedemptionService<S>,
    frozen: FrozenPointsService<S>,
    usage: DailyUsageService<S>,
}

impl<S> Clone for PointLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            wallets: self.wallets.clone(),
            redemptions: self.redemptions.clone(),
            frozen: self.frozen.clone(),
            usage: self.usage.clone(),
        }
    }
}

impl<S: LedgerStore> PointLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            wallets: WalletService::new(store.clone()),
            redemptions: RedemptionService::new(store.clone()),
            frozen: FrozenPointsService::new(store.clone()),
            usage: DailyUsageService::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn wallets(&self) -> &WalletService<S> {
        &self.wallets
    }

    pub fn redemptions(&self) -> &RedemptionService<S> {
        &self.redemptions
    }

    pub fn frozen_points(&self) -> &FrozenPointsService<S> {
        &self.frozen
    }

    pub fn daily_usage(&self) -> &DailyUsageService<S> {
        &self.usage
    }

    /// Returns the wallet's available points after the redemption.
    pub async fn redeem(&self, user_id: Uuid, code: &str) -> Result<i64, LedgerError> {
        let RedeemOutcome { wallet, .. } = self.redemptions.redeem(user_id, code).await?;
        Ok(wallet.available_points)
    }

    /// Returns the available points left after billing `points`.
    pub async fn consume(
        &self,
        user_id: Uuid,
        points: i64,
        meta: RequestMeta,
    ) -> Result<i64, LedgerError> {
        self.usage.consume(user_id, points, meta).await
    }

    pub async fn ban(
        &self,
        user_id: Uuid,
        code: &str,
        reason: &str,
        admin_id: Uuid,
    ) -> Result<FrozenPointsRecord, LedgerError> {
        self.frozen.ban(user_id, code, reason, admin_id).await
    }

    pub async fn unban(
        &self,
        user_id: Uuid,
        code: &str,
        admin_id: Uuid,
    ) -> Result<FrozenPointsRecord, LedgerError> {
        self.frozen.unban(user_id, code, admin_id).await
    }

    pub async fn preview_ban(&self, user_id: Uuid, code: &str) -> Result<BanPreview, LedgerError> {
        self.frozen.preview_ban(user_id, code).await
    }
}
