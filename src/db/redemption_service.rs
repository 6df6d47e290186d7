use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::ledger_common::{
    LedgerError, generate_activation_code, normalize_code, require_positive,
};
use super::models::{
    ActivationCode, Benefits, Card, CodeStatus, ServicePlan, SourceType, Wallet, WalletStatus,
};
use super::store::{LedgerStore, LedgerTx};
use super::wallet_service::{get_or_create_in, save_in};
use crate::ledger::freeze_plan::active_benefits;
use crate::ledger::slots::local_date;

// ── Structs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewPlan {
    pub name: String,
    pub level: i32,
    pub points: i64,
    pub validity_days: i32,
    pub benefits: Benefits,
}

#[derive(Debug, Clone)]
pub struct RedeemOutcome {
    pub card: Card,
    pub wallet: Wallet,
    /// The code renewed a plan of the level the wallet already holds.
    pub same_level: bool,
}

#[derive(Debug, Clone)]
pub struct CheckinOutcome {
    pub points: i64,
    pub card: Card,
    pub wallet: Wallet,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn banned_codes<T: LedgerTx>(tx: &mut T, user_id: Uuid) -> Result<HashSet<String>, LedgerError> {
    Ok(tx
        .open_frozen_records(user_id)
        .await?
        .into_iter()
        .map(|r| r.banned_activation_code)
        .collect())
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct RedemptionService<S> {
    store: Arc<S>,
}

impl<S> Clone for RedemptionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: LedgerStore> RedemptionService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn create_plan(&self, plan: NewPlan) -> Result<ServicePlan, LedgerError> {
        require_positive("points", plan.points)?;
        require_positive("validity_days", i64::from(plan.validity_days))?;
        if plan.name.trim().is_empty() {
            return Err(LedgerError::Validation("plan name is empty".into()));
        }
        let plan = ServicePlan {
            id: Uuid::new_v4(),
            name: plan.name.trim().to_string(),
            level: plan.level,
            points: plan.points,
            validity_days: plan.validity_days,
            benefits: plan.benefits,
            is_active: true,
        };
        let mut tx = self.store.begin().await?;
        tx.insert_plan(&plan).await?;
        tx.commit().await?;
        Ok(plan)
    }

    pub async fn set_plan_active(&self, plan_id: Uuid, active: bool) -> Result<(), LedgerError> {
        let mut tx = self.store.begin().await?;
        if !tx.set_plan_active(plan_id, active).await? {
            return Err(LedgerError::Validation(format!("unknown plan {plan_id}")));
        }
        tx.commit().await
    }

    /// Issues `count` fresh codes for a plan. `expires_at` is the redeem-by deadline.
    pub async fn issue_codes(
        &self,
        plan_id: Uuid,
        count: usize,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<ActivationCode>, LedgerError> {
        if count == 0 || count > 10_000 {
            return Err(LedgerError::Validation(format!(
                "code count must be within 1..=10000, got {count}"
            )));
        }
        let mut tx = self.store.begin().await?;
        if tx.plan(plan_id).await?.is_none() {
            return Err(LedgerError::Validation(format!("unknown plan {plan_id}")));
        }
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            let code = ActivationCode {
                code: generate_activation_code(),
                plan_id,
                status: CodeStatus::Unused,
                expires_at,
                used_by: None,
                used_at: None,
            };
            tx.insert_activation_code(&code).await?;
            codes.push(code);
        }
        tx.commit().await?;
        info!(%plan_id, count, "issued activation codes");
        Ok(codes)
    }

    pub async fn redeem(&self, user_id: Uuid, code: &str) -> Result<RedeemOutcome, LedgerError> {
        self.redeem_at(user_id, code, Utc::now()).await
    }

    /// Converts an activation code into a card and funds the wallet.
    ///
    /// Redeeming a plan of the same level as an unexpired, unbanned card the
    /// wallet already holds is a renewal: the wallet is reset to the new
    /// plan's points and the card is flagged so attribution starts over from it.
    pub async fn redeem_at(
        &self,
        user_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, LedgerError> {
        let code = normalize_code(code)?;
        let mut tx = self.store.begin().await?;

        let activation = tx
            .activation_code_for_update(code)
            .await?
            .ok_or(LedgerError::InvalidCode)?;
        if activation.status != CodeStatus::Unused {
            return Err(LedgerError::InvalidCode);
        }
        if activation.expires_at.is_some_and(|deadline| deadline <= now) {
            return Err(LedgerError::CodeExpired);
        }
        let plan = tx
            .plan(activation.plan_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(LedgerError::InactivePlan)?;

        let mut wallet = get_or_create_in(&mut tx, user_id, now).await?;
        let mut cards = tx.cards_for_user(user_id).await?;
        let banned = banned_codes(&mut tx, user_id).await?;

        let same_level = wallet.is_active_at(now)
            && cards.iter().any(|c| {
                c.source_type == SourceType::ActivationCode
                    && c.plan_level == plan.level
                    && c.expires_at > now
                    && !banned.contains(&c.source_id)
            });

        let card = Card {
            id: Uuid::new_v4(),
            user_id,
            source_type: SourceType::ActivationCode,
            source_id: code.to_string(),
            points_amount: plan.points,
            activated_at: now,
            expires_at: now + Duration::days(i64::from(plan.validity_days)),
            benefits: plan.benefits.clone(),
            plan_level: plan.level,
            resets_history: same_level,
            reason: if same_level {
                format!("same-level renewal: {}", plan.name)
            } else {
                format!("redeemed plan: {}", plan.name)
            },
            granted_by: None,
        };

        if same_level {
            wallet.total_points = plan.points;
            wallet.available_points = plan.points;
            wallet.used_points = 0;
            wallet.wallet_expires_at = card.expires_at;
            wallet.status = WalletStatus::Active;
        } else {
            wallet.total_points += plan.points;
            wallet.available_points += plan.points;
            wallet.extend_to(card.expires_at, now);
        }
        cards.push(card.clone());
        wallet.benefits = active_benefits(&cards, wallet.used_points, &banned, now);

        tx.insert_card(&card).await?;
        tx.mark_code_used(code, user_id, now).await?;
        save_in(&mut tx, &wallet).await?;
        tx.commit().await?;

        info!(
            %user_id,
            code,
            points = plan.points,
            same_level,
            available = wallet.available_points,
            "activation code redeemed"
        );
        Ok(RedeemOutcome {
            card,
            wallet,
            same_level,
        })
    }

    /// Admin grant. Funds and, if needed, reactivates the wallet.
    pub async fn gift(
        &self,
        user_id: Uuid,
        points: i64,
        validity_days: i32,
        reason: &str,
        admin_id: Uuid,
    ) -> Result<Card, LedgerError> {
        require_positive("points", points)?;
        require_positive("validity_days", i64::from(validity_days))?;
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut wallet = get_or_create_in(&mut tx, user_id, now).await?;

        let card = Card {
            id: Uuid::new_v4(),
            user_id,
            source_type: SourceType::AdminGift,
            source_id: format!("gift-{}", Uuid::new_v4().simple()),
            points_amount: points,
            activated_at: now,
            expires_at: now + Duration::days(i64::from(validity_days)),
            benefits: Benefits::default(),
            plan_level: 0,
            resets_history: false,
            reason: reason.to_string(),
            granted_by: Some(admin_id),
        };
        wallet.total_points += points;
        wallet.available_points += points;
        wallet.extend_to(card.expires_at, now);

        tx.insert_card(&card).await?;
        save_in(&mut tx, &wallet).await?;
        tx.commit().await?;
        info!(%user_id, %admin_id, points, "admin gift granted");
        Ok(card)
    }

    pub async fn checkin(&self, user_id: Uuid) -> Result<CheckinOutcome, LedgerError> {
        self.checkin_at(user_id, Utc::now()).await
    }

    /// Daily check-in reward, once per local calendar day.
    pub async fn checkin_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CheckinOutcome, LedgerError> {
        let mut tx = self.store.begin().await?;
        let mut wallet = get_or_create_in(&mut tx, user_id, now).await?;
        if !wallet.is_active_at(now) {
            return Err(LedgerError::WalletInactive);
        }
        let low = wallet.benefits.daily_checkin_points;
        if low <= 0 {
            return Err(LedgerError::Validation(
                "wallet has no daily check-in benefit".into(),
            ));
        }
        let today = local_date(now);
        if wallet.last_checkin_date == Some(today) {
            return Err(LedgerError::AlreadyCheckedIn);
        }
        let high = wallet.benefits.daily_checkin_points_max.max(low);
        let points = rand::rng().random_range(low..=high);

        let card = Card {
            id: Uuid::new_v4(),
            user_id,
            source_type: SourceType::DailyCheckin,
            source_id: format!("checkin-{user_id}-{today}"),
            points_amount: points,
            activated_at: now,
            expires_at: wallet.wallet_expires_at,
            benefits: Benefits::default(),
            plan_level: 0,
            resets_history: false,
            reason: format!("daily check-in {today}"),
            granted_by: None,
        };
        wallet.total_points += points;
        wallet.available_points += points;
        wallet.last_checkin_date = Some(today);

        tx.insert_card(&card).await?;
        save_in(&mut tx, &wallet).await?;
        tx.commit().await?;
        info!(%user_id, points, "daily check-in");
        Ok(CheckinOutcome {
            points,
            card,
            wallet,
        })
    }

    /// All cards for the user, oldest activation first.
    pub async fn cards(&self, user_id: Uuid) -> Result<Vec<Card>, LedgerError> {
        let mut tx = self.store.begin().await?;
        tx.cards_for_user(user_id).await
    }
}
