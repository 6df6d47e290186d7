use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::ledger_common::{ErrorKind, LedgerError, require_positive};
use super::models::{RequestMeta, UsageRecord, Wallet};
use super::store::{LedgerStore, LedgerTx};
use super::wallet_service::{deduct_in, get_or_create_in};
use crate::ledger::slots::local_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyAllowance {
    /// `<= 0` means no cap.
    pub limit: i64,
    pub used_today: i64,
    /// `i64::MAX` when uncapped.
    pub remaining: i64,
}

/// Checks `points` against the wallet's daily cap for the local day of `now`.
pub async fn check_daily_limit_in<T: LedgerTx>(
    tx: &mut T,
    wallet: &Wallet,
    points: i64,
    now: DateTime<Utc>,
) -> Result<DailyAllowance, LedgerError> {
    let used_today = tx.daily_usage(wallet.user_id, local_date(now)).await?;
    let limit = wallet.benefits.daily_max_points;
    if limit <= 0 {
        return Ok(DailyAllowance {
            limit,
            used_today,
            remaining: i64::MAX,
        });
    }
    let remaining = (limit - used_today).max(0);
    if points > remaining {
        return Err(LedgerError::DailyLimitExceeded {
            limit,
            used_today,
            remaining,
            requested: points,
        });
    }
    Ok(DailyAllowance {
        limit,
        used_today,
        remaining,
    })
}

/// Refusals are expected traffic, not failures.
fn log_refusal<T>(user_id: Uuid, points: i64, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
    if let Err(e) = &result {
        if e.kind() == ErrorKind::Business {
            debug!(%user_id, points, reason = %e, "consumption refused");
        }
    }
    result
}

pub struct DailyUsageService<S> {
    store: Arc<S>,
}

impl<S> Clone for DailyUsageService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: LedgerStore> DailyUsageService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Read-only. A user without a wallet has no cap.
    pub async fn check_daily_limit(
        &self,
        user_id: Uuid,
        points: i64,
    ) -> Result<DailyAllowance, LedgerError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let wallet = tx
            .wallet_for_update(user_id)
            .await?
            .unwrap_or_else(|| Wallet::empty(user_id, now));
        let result = check_daily_limit_in(&mut tx, &wallet, points, now).await;
        log_refusal(user_id, points, result)
    }

    pub async fn deduct_with_daily_limit(
        &self,
        user_id: Uuid,
        points: i64,
    ) -> Result<Wallet, LedgerError> {
        self.deduct_with_daily_limit_at(user_id, points, Utc::now()).await
    }

    /// Limit check, wallet deduct and daily counter in one transaction.
    pub async fn deduct_with_daily_limit_at(
        &self,
        user_id: Uuid,
        points: i64,
        now: DateTime<Utc>,
    ) -> Result<Wallet, LedgerError> {
        let result = async {
            require_positive("points", points)?;
            let mut tx = self.store.begin().await?;
            let wallet = get_or_create_in(&mut tx, user_id, now).await?;
            check_daily_limit_in(&mut tx, &wallet, points, now).await?;
            let wallet = deduct_in(&mut tx, user_id, points, now).await?;
            tx.add_daily_usage(user_id, local_date(now), points).await?;
            tx.commit().await?;
            Ok::<_, LedgerError>(wallet)
        }
        .await;
        log_refusal(user_id, points, result)
    }

    pub async fn consume(
        &self,
        user_id: Uuid,
        points: i64,
        meta: RequestMeta,
    ) -> Result<i64, LedgerError> {
        self.consume_at(user_id, points, meta, Utc::now()).await
    }

    /// Bills one API call. Returns the available points left afterwards.
    pub async fn consume_at(
        &self,
        user_id: Uuid,
        points: i64,
        meta: RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<i64, LedgerError> {
        let result = async {
            require_positive("points", points)?;
            let mut tx = self.store.begin().await?;
            let wallet = get_or_create_in(&mut tx, user_id, now).await?;
            if !wallet.is_active_at(now) {
                return Err(LedgerError::WalletInactive);
            }
            check_daily_limit_in(&mut tx, &wallet, points, now).await?;
            let wallet = deduct_in(&mut tx, user_id, points, now).await?;
            tx.add_daily_usage(user_id, local_date(now), points).await?;
            tx.insert_usage_record(&UsageRecord {
                id: Uuid::new_v4(),
                user_id,
                points,
                request_id: meta.request_id,
                model: meta.model,
                created_at: now,
            })
            .await?;
            tx.commit().await?;
            Ok::<_, LedgerError>(wallet.available_points)
        }
        .await;
        log_refusal(user_id, points, result)
    }
}
