use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::ledger_common::{LedgerError, normalize_code};
use super::models::{
    Benefits, FrozenPointsRecord, FrozenStatus, SourceType, Wallet, WalletSnapshot,
};
use super::store::{LedgerStore, LedgerTx};
use super::wallet_service::save_in;
use crate::ledger::consumption::{CardConsumption, ConsumptionBreakdown};
use crate::ledger::freeze_plan::{BanPlan, plan_ban, restored_benefits};

/// What a ban would do, computed exactly as `ban` computes it.
#[derive(Debug, Clone)]
pub struct BanPreview {
    pub target: CardConsumption,
    pub breakdown: ConsumptionBreakdown,
    pub points_to_freeze: i64,
    pub benefits_after: Benefits,
    pub wallet_collapses: bool,
    pub calculation_method: String,
    pub projected_total: i64,
    pub projected_available: i64,
    pub projected_used: i64,
}

async fn codes_with_open_records<T: LedgerTx>(
    tx: &mut T,
    user_id: Uuid,
    except: &str,
) -> Result<HashSet<String>, LedgerError> {
    Ok(tx
        .open_frozen_records(user_id)
        .await?
        .into_iter()
        .map(|r| r.banned_activation_code)
        .filter(|c| c != except)
        .collect())
}

/// Loads everything a ban needs and plans it. Shared by `ban` and `preview_ban`.
async fn plan_in<T: LedgerTx>(
    tx: &mut T,
    user_id: Uuid,
    code: &str,
    now: DateTime<Utc>,
) -> Result<(Wallet, BanPlan), LedgerError> {
    // The wallet row lock serialises bans of the same user.
    let wallet = tx
        .wallet_for_update(user_id)
        .await?
        .ok_or_else(|| LedgerError::CardNotFound(code.to_string()))?;
    if tx.open_frozen_record(user_id, code).await?.is_some() {
        return Err(LedgerError::AlreadyBanned(code.to_string()));
    }
    let cards = tx.cards_for_user(user_id).await?;
    let banned = codes_with_open_records(tx, user_id, code).await?;
    let plan = plan_ban(&wallet, &cards, &banned, code, now)?;
    Ok((wallet, plan))
}

pub struct FrozenPointsService<S> {
    store: Arc<S>,
}

impl<S> Clone for FrozenPointsService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: LedgerStore> FrozenPointsService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn ban(
        &self,
        user_id: Uuid,
        code: &str,
        reason: &str,
        admin_id: Uuid,
    ) -> Result<FrozenPointsRecord, LedgerError> {
        self.ban_at(user_id, code, reason, admin_id, Utc::now()).await
    }

    /// Freezes the unconsumed part of one activation card.
    pub async fn ban_at(
        &self,
        user_id: Uuid,
        code: &str,
        reason: &str,
        admin_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FrozenPointsRecord, LedgerError> {
        let code = normalize_code(code)?;
        let mut tx = self.store.begin().await?;
        let (mut wallet, plan) = plan_in(&mut tx, user_id, code, now).await?;

        let before_ban_wallet_state = serde_json::to_value(wallet.snapshot())?;
        let before_ban_benefits = serde_json::to_value(&wallet.benefits)?;
        plan.apply(&mut wallet, now);

        let record = FrozenPointsRecord {
            id: Uuid::new_v4(),
            user_id,
            banned_activation_code: code.to_string(),
            frozen_points: plan.frozen_points,
            frozen_benefits: serde_json::to_value(&plan.frozen_benefits)?,
            before_ban_wallet_state,
            before_ban_benefits,
            calculation_method: plan.calculation_method.clone(),
            estimated_usage: plan.target.consumed,
            wallet_collapsed: plan.collapses,
            status: FrozenStatus::Frozen,
            reason: reason.to_string(),
            banned_by: admin_id,
            banned_at: now,
            restored_by: None,
            restored_at: None,
        };

        save_in(&mut tx, &wallet).await?;
        tx.insert_frozen_record(&record).await?;
        tx.commit().await?;

        info!(
            %user_id,
            code,
            %admin_id,
            frozen_points = record.frozen_points,
            collapsed = record.wallet_collapsed,
            "card banned"
        );
        Ok(record)
    }

    pub async fn unban(
        &self,
        user_id: Uuid,
        code: &str,
        admin_id: Uuid,
    ) -> Result<FrozenPointsRecord, LedgerError> {
        self.unban_at(user_id, code, admin_id, Utc::now()).await
    }

    /// Reverses the open ban on `code`.
    ///
    /// A ban that collapsed the wallet is undone from its snapshot: the
    /// snapshot's points are added back on top of whatever the wallet holds
    /// now, and its status and expiry come back unless the wallet has been
    /// reactivated since. A wallet left expired by a later ban is reactivated
    /// until the restored card expires.
    pub async fn unban_at(
        &self,
        user_id: Uuid,
        code: &str,
        admin_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FrozenPointsRecord, LedgerError> {
        let code = normalize_code(code)?;
        let mut tx = self.store.begin().await?;
        let mut wallet = tx
            .wallet_for_update(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFrozen(code.to_string()))?;
        let mut record = tx
            .open_frozen_record(user_id, code)
            .await?
            .ok_or_else(|| LedgerError::NotFrozen(code.to_string()))?;

        if record.wallet_collapsed {
            let snapshot: WalletSnapshot =
                serde_json::from_value(record.before_ban_wallet_state.clone())?;
            wallet.total_points += snapshot.total_points;
            wallet.available_points += snapshot.available_points;
            wallet.used_points += snapshot.used_points;
            if wallet.is_active_at(now) {
                wallet.wallet_expires_at = wallet.wallet_expires_at.max(snapshot.wallet_expires_at);
            } else {
                wallet.status = snapshot.status;
                wallet.wallet_expires_at = snapshot.wallet_expires_at;
            }
        } else {
            wallet.total_points += record.frozen_points;
            wallet.available_points += record.frozen_points;
        }

        let cards = tx.cards_for_user(user_id).await?;
        if !wallet.is_active_at(now) {
            let restored = cards.iter().find(|c| {
                c.source_type == SourceType::ActivationCode && c.source_id == code && c.expires_at > now
            });
            if let Some(card) = restored {
                wallet.extend_to(card.expires_at, now);
            }
        }
        let still_banned = codes_with_open_records(&mut tx, user_id, code).await?;
        wallet.benefits = restored_benefits(&cards, wallet.used_points, &still_banned, code, now);
        wallet.updated_at = now;

        save_in(&mut tx, &wallet).await?;
        tx.mark_frozen_restored(record.id, admin_id, now).await?;
        tx.commit().await?;

        record.status = FrozenStatus::Restored;
        record.restored_by = Some(admin_id);
        record.restored_at = Some(now);
        info!(%user_id, code, %admin_id, restored_points = record.frozen_points, "card unbanned");
        Ok(record)
    }

    /// Read-only dry run of `ban`. The transaction is never committed.
    pub async fn preview_ban(&self, user_id: Uuid, code: &str) -> Result<BanPreview, LedgerError> {
        let code = normalize_code(code)?;
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let (wallet, plan) = plan_in(&mut tx, user_id, code, now).await?;
        drop(tx);

        let mut projected = wallet;
        plan.apply(&mut projected, now);
        Ok(BanPreview {
            points_to_freeze: plan.frozen_points,
            benefits_after: plan.benefits_after,
            wallet_collapses: plan.collapses,
            calculation_method: plan.calculation_method,
            target: plan.target,
            breakdown: plan.breakdown,
            projected_total: projected.total_points,
            projected_available: projected.available_points,
            projected_used: projected.used_points,
        })
    }

    /// Every ban for the user, newest first.
    pub async fn records(&self, user_id: Uuid) -> Result<Vec<FrozenPointsRecord>, LedgerError> {
        let mut tx = self.store.begin().await?;
        tx.frozen_records(user_id).await
    }
}
