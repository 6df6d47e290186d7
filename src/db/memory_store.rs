//! In-process store with the same all-or-nothing contract as PostgreSQL.
//!
//! A transaction holds the store lock for its whole life and works on a
//! private copy of the state; `commit` swaps the copy in, dropping it throws
//! the copy away. Transactions are therefore fully serialised.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashSet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::ledger_common::LedgerError;
use super::models::{
    ActivationCode, Card, CodeStatus, FrozenPointsRecord, FrozenStatus, ServicePlan, UsageRecord,
    Wallet, WalletStatus,
};
use super::store::{LedgerStore, LedgerTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    wallets: HashMap<Uuid, Wallet>,
    cards: Vec<Card>,
    plans: HashMap<Uuid, ServicePlan>,
    codes: HashMap<String, ActivationCode>,
    frozen: Vec<FrozenPointsRecord>,
    daily_usage: HashMap<(Uuid, NaiveDate), i64>,
    usage_records: Vec<UsageRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failing: Arc<DashSet<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write to `table` fail with a storage error.
    /// Tables: wallets, redemption_records, activation_codes, frozen_points_records,
    /// daily_usage, usage_records.
    pub fn fail_writes_to(&self, table: &'static str) {
        self.failing.insert(table);
    }

    pub fn clear_failures(&self) {
        self.failing.clear();
    }

    /// Committed wallet, bypassing transactions.
    pub async fn wallet(&self, user_id: Uuid) -> Option<Wallet> {
        self.state.lock().await.wallets.get(&user_id).cloned()
    }

    pub async fn cards(&self, user_id: Uuid) -> Vec<Card> {
        let state = self.state.lock().await;
        state.cards.iter().filter(|c| c.user_id == user_id).cloned().collect()
    }

    pub async fn usage_records(&self, user_id: Uuid) -> Vec<UsageRecord> {
        let state = self.state.lock().await;
        state
            .usage_records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Overwrites a wallet directly. Test setup only; skips all ledger rules.
    pub async fn put_wallet(&self, wallet: Wallet) {
        self.state.lock().await.wallets.insert(wallet.user_id, wallet);
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    failing: Arc<DashSet<&'static str>>,
}

impl MemoryTx {
    fn write(&self, table: &'static str) -> Result<(), LedgerError> {
        if self.failing.contains(table) {
            return Err(LedgerError::Storage(format!("injected write failure on {table}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, LedgerError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx {
            guard,
            working,
            failing: self.failing.clone(),
        })
    }

    async fn auto_refill_candidates(&self) -> Result<Vec<Uuid>, LedgerError> {
        let state = self.state.lock().await;
        let mut ids: Vec<Uuid> = state
            .wallets
            .values()
            .filter(|w| w.benefits.auto_refill_enabled && w.status == WalletStatus::Active)
            .map(|w| w.user_id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn commit(self) -> Result<(), LedgerError> {
        let MemoryTx {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }

    async fn wallet_for_update(&mut self, user_id: Uuid) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.working.wallets.get(&user_id).cloned())
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), LedgerError> {
        self.write("wallets")?;
        self.working
            .wallets
            .entry(wallet.user_id)
            .or_insert_with(|| wallet.clone());
        Ok(())
    }

    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<(), LedgerError> {
        self.write("wallets")?;
        match self.working.wallets.get_mut(&wallet.user_id) {
            Some(slot) => {
                *slot = wallet.clone();
                slot.updated_at = Utc::now();
                Ok(())
            }
            None => Err(LedgerError::Storage(format!(
                "wallet {} vanished",
                wallet.user_id
            ))),
        }
    }

    async fn increment_points(&mut self, user_id: Uuid, points: i64) -> Result<bool, LedgerError> {
        self.write("wallets")?;
        Ok(match self.working.wallets.get_mut(&user_id) {
            Some(w) => {
                w.total_points += points;
                w.available_points += points;
                w.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn deduct_points(&mut self, user_id: Uuid, points: i64) -> Result<bool, LedgerError> {
        self.write("wallets")?;
        Ok(match self.working.wallets.get_mut(&user_id) {
            Some(w) if w.available_points >= points => {
                w.available_points -= points;
                w.used_points += points;
                w.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn cards_for_user(&mut self, user_id: Uuid) -> Result<Vec<Card>, LedgerError> {
        let mut cards: Vec<Card> = self
            .working
            .cards
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.activated_at.cmp(&b.activated_at).then(a.id.cmp(&b.id)));
        Ok(cards)
    }

    async fn insert_card(&mut self, card: &Card) -> Result<(), LedgerError> {
        self.write("redemption_records")?;
        self.working.cards.push(card.clone());
        Ok(())
    }

    async fn plan(&mut self, plan_id: Uuid) -> Result<Option<ServicePlan>, LedgerError> {
        Ok(self.working.plans.get(&plan_id).cloned())
    }

    async fn insert_plan(&mut self, plan: &ServicePlan) -> Result<(), LedgerError> {
        self.write("service_plans")?;
        self.working.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn set_plan_active(&mut self, plan_id: Uuid, active: bool) -> Result<bool, LedgerError> {
        self.write("service_plans")?;
        Ok(match self.working.plans.get_mut(&plan_id) {
            Some(p) => {
                p.is_active = active;
                true
            }
            None => false,
        })
    }

    async fn activation_code_for_update(
        &mut self,
        code: &str,
    ) -> Result<Option<ActivationCode>, LedgerError> {
        Ok(self.working.codes.get(code).cloned())
    }

    async fn insert_activation_code(&mut self, code: &ActivationCode) -> Result<(), LedgerError> {
        self.write("activation_codes")?;
        if self.working.codes.contains_key(&code.code) {
            return Err(LedgerError::Storage(format!(
                "duplicate activation code {}",
                code.code
            )));
        }
        self.working.codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn mark_code_used(
        &mut self,
        code: &str,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.write("activation_codes")?;
        if let Some(c) = self.working.codes.get_mut(code) {
            c.status = CodeStatus::Used;
            c.used_by = Some(user_id);
            c.used_at = Some(at);
        }
        Ok(())
    }

    async fn open_frozen_records(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<FrozenPointsRecord>, LedgerError> {
        Ok(self
            .working
            .frozen
            .iter()
            .filter(|r| r.user_id == user_id && r.status == FrozenStatus::Frozen)
            .cloned()
            .collect())
    }

    async fn frozen_records(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<FrozenPointsRecord>, LedgerError> {
        let mut records: Vec<FrozenPointsRecord> = self
            .working
            .frozen
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.banned_at.cmp(&a.banned_at));
        Ok(records)
    }

    async fn insert_frozen_record(
        &mut self,
        record: &FrozenPointsRecord,
    ) -> Result<(), LedgerError> {
        self.write("frozen_points_records")?;
        self.working.frozen.push(record.clone());
        Ok(())
    }

    async fn mark_frozen_restored(
        &mut self,
        record_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.write("frozen_points_records")?;
        let record = self
            .working
            .frozen
            .iter_mut()
            .find(|r| r.id == record_id && r.status == FrozenStatus::Frozen)
            .ok_or_else(|| {
                LedgerError::Storage(format!("frozen record {record_id} changed underneath unban"))
            })?;
        record.status = FrozenStatus::Restored;
        record.restored_by = Some(admin_id);
        record.restored_at = Some(at);
        Ok(())
    }

    async fn daily_usage(&mut self, user_id: Uuid, date: NaiveDate) -> Result<i64, LedgerError> {
        Ok(self
            .working
            .daily_usage
            .get(&(user_id, date))
            .copied()
            .unwrap_or(0))
    }

    async fn add_daily_usage(
        &mut self,
        user_id: Uuid,
        date: NaiveDate,
        points: i64,
    ) -> Result<(), LedgerError> {
        self.write("daily_usage")?;
        *self.working.daily_usage.entry((user_id, date)).or_insert(0) += points;
        Ok(())
    }

    async fn insert_usage_record(&mut self, record: &UsageRecord) -> Result<(), LedgerError> {
        self.write("usage_records")?;
        self.working.usage_records.push(record.clone());
        Ok(())
    }
}
