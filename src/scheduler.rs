//! Auto-refill scheduler.
//!
//! Wakes every `tick_seconds`, and when the local hour opens a new slot
//! (0, 4, 8, 12, 16, 20 for 4-hour slots) scans auto-refill wallets. Whether
//! a wallet was already topped up in the current slot is decided from its
//! persisted `last_auto_refill_time`, so restarts and extra instances never
//! double-refill.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::db::ledger_common::LedgerError;
use crate::db::models::{Benefits, Card, SourceType, WalletStatus};
use crate::db::store::{LedgerStore, LedgerTx};
use crate::db::wallet_service::save_in;
use crate::ledger::slots::{RefillSlot, is_slot_hour, same_slot, slot_of};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillReport {
    pub scanned: usize,
    pub refilled: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct AutoRefillScheduler<S> {
    store: Arc<S>,
    config: SchedulerConfig,
}

impl<S: LedgerStore> AutoRefillScheduler<S> {
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    /// One scan over every candidate wallet. A failing wallet is logged and
    /// counted; the scan carries on with the rest.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RefillReport, LedgerError> {
        let candidates = self.store.auto_refill_candidates().await?;
        let mut report = RefillReport::default();
        for user_id in candidates {
            report.scanned += 1;
            match self.refill_wallet(user_id, now).await {
                Ok(Some(_)) => report.refilled += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(%user_id, error = %e, "auto refill failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            scanned = report.scanned,
            refilled = report.refilled,
            skipped = report.skipped,
            failed = report.failed,
            "auto refill pass finished"
        );
        Ok(report)
    }

    /// Tops up one wallet in its own transaction if it still qualifies.
    pub async fn refill_wallet(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Card>, LedgerError> {
        let mut tx = self.store.begin().await?;
        let Some(mut wallet) = tx.wallet_for_update(user_id).await? else {
            return Ok(None);
        };
        let benefits = &wallet.benefits;
        if !benefits.auto_refill_enabled
            || wallet.status != WalletStatus::Active
            || benefits.auto_refill_amount <= 0
            || wallet.available_points > benefits.auto_refill_threshold
        {
            return Ok(None);
        }
        if same_slot(wallet.last_auto_refill_time, now, self.config.slot_hours) {
            debug!(%user_id, "already refilled this slot");
            return Ok(None);
        }

        let amount = benefits.auto_refill_amount;
        let card = Card {
            id: Uuid::new_v4(),
            user_id,
            source_type: SourceType::AutoRefill,
            source_id: format!("auto-refill-{}", Uuid::new_v4().simple()),
            points_amount: amount,
            activated_at: now,
            expires_at: now + Duration::days(self.config.refill_validity_days),
            benefits: Benefits::default(),
            plan_level: 0,
            resets_history: false,
            reason: format!(
                "auto refill: available {} <= threshold {}",
                wallet.available_points, benefits.auto_refill_threshold
            ),
            granted_by: None,
        };
        wallet.total_points += amount;
        wallet.available_points += amount;
        wallet.last_auto_refill_time = Some(now);
        wallet.updated_at = now;

        tx.insert_card(&card).await?;
        save_in(&mut tx, &wallet).await?;
        tx.commit().await?;
        info!(%user_id, points = amount, available = wallet.available_points, "auto refill applied");
        Ok(Some(card))
    }

    async fn pass(&self, now: DateTime<Utc>) {
        if let Err(e) = self.run_once(now).await {
            warn!(error = %e, "auto refill scan failed");
        }
    }

    /// Runs one pass immediately, then one per slot until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let hours = self.config.slot_hours;
        let now = Utc::now();
        let mut last_slot = due_slot(None, now, hours);
        info!(slot_hours = hours, tick_seconds = self.config.tick_seconds, "auto refill scheduler started");
        self.pass(now).await;

        let mut ticker = tokio::time::interval(StdDuration::from_secs(self.config.tick_seconds.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("auto refill scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    if let Some(slot) = due_slot(last_slot, now, hours) {
                        last_slot = Some(slot);
                        self.pass(now).await;
                    }
                }
            }
        }
    }
}

/// The slot a tick at `now` should run, or `None` when it is off the slot
/// boundary hour or `last` already ran it.
pub(crate) fn due_slot(
    last: Option<RefillSlot>,
    now: DateTime<Utc>,
    slot_hours: u32,
) -> Option<RefillSlot> {
    if !is_slot_hour(now, slot_hours) {
        return None;
    }
    let slot = slot_of(now, slot_hours);
    (last != Some(slot)).then_some(slot)
}
