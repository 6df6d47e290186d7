use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::ledger_common::LedgerError;

// ── Enums (stored as TEXT) ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ActivationCode,
    AdminGift,
    DailyCheckin,
    Payment,
    AutoRefill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FrozenStatus {
    Frozen,
    Restored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Unused,
    Used,
    Disabled,
}

// ── Benefits ──────────────────────────────────────────────────────────────────

/// Per-plan service parameters. Flattened into wallets, cards and plans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Benefits {
    pub daily_max_points: i64,
    pub degradation_guaranteed: i64,
    pub daily_checkin_points: i64,
    pub daily_checkin_points_max: i64,
    pub auto_refill_enabled: bool,
    pub auto_refill_threshold: i64,
    pub auto_refill_amount: i64,
}

// ── Wallet ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_points: i64,
    pub available_points: i64,
    pub used_points: i64,
    #[sqlx(flatten)]
    pub benefits: Benefits,
    pub last_auto_refill_time: Option<DateTime<Utc>>,
    pub wallet_expires_at: DateTime<Utc>,
    pub status: WalletStatus,
    pub last_checkin_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Point and benefit state captured before a ban, kept on the frozen record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub total_points: i64,
    pub available_points: i64,
    pub used_points: i64,
    pub status: WalletStatus,
    pub wallet_expires_at: DateTime<Utc>,
}

impl Wallet {
    /// Fresh wallet: no points, expired until something funds it.
    pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            total_points: 0,
            available_points: 0,
            used_points: 0,
            benefits: Benefits::default(),
            last_auto_refill_time: None,
            wallet_expires_at: now,
            status: WalletStatus::Expired,
            last_checkin_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == WalletStatus::Active && self.wallet_expires_at > now
    }

    pub fn is_balanced(&self) -> bool {
        self.total_points >= 0
            && self.available_points >= 0
            && self.used_points >= 0
            && self.total_points == self.available_points + self.used_points
    }

    /// Refuses to let a torn wallet reach storage.
    pub fn ensure_balanced(&self) -> Result<(), LedgerError> {
        if self.is_balanced() {
            Ok(())
        } else {
            Err(LedgerError::Invariant(format!(
                "wallet {} total={} available={} used={}",
                self.user_id, self.total_points, self.available_points, self.used_points
            )))
        }
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            total_points: self.total_points,
            available_points: self.available_points,
            used_points: self.used_points,
            status: self.status,
            wallet_expires_at: self.wallet_expires_at,
        }
    }

    /// Activates the wallet, or stretches its expiry to cover `until`.
    pub fn extend_to(&mut self, until: DateTime<Utc>, now: DateTime<Utc>) {
        self.wallet_expires_at = if self.is_active_at(now) {
            self.wallet_expires_at.max(until)
        } else {
            until
        };
        self.status = WalletStatus::Active;
    }

    /// Empties the wallet completely and marks it expired.
    pub fn collapse(&mut self, now: DateTime<Utc>) {
        self.total_points = 0;
        self.available_points = 0;
        self.used_points = 0;
        self.benefits = Benefits::default();
        self.status = WalletStatus::Expired;
        self.wallet_expires_at = now;
    }
}

// ── Cards (redemption records) ────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct Card {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub points_amount: i64,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[sqlx(flatten)]
    pub benefits: Benefits,
    pub plan_level: i32,
    pub resets_history: bool,
    pub reason: String,
    pub granted_by: Option<Uuid>,
}

// ── Plans and activation codes ────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct ServicePlan {
    pub id: Uuid,
    pub name: String,
    pub level: i32,
    pub points: i64,
    pub validity_days: i32,
    #[sqlx(flatten)]
    pub benefits: Benefits,
    pub is_active: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct ActivationCode {
    pub code: String,
    pub plan_id: Uuid,
    pub status: CodeStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_by: Option<Uuid>,
    pub used_at: Option<DateTime<Utc>>,
}

// ── Frozen points ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct FrozenPointsRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub banned_activation_code: String,
    pub frozen_points: i64,
    pub frozen_benefits: serde_json::Value,
    pub before_ban_wallet_state: serde_json::Value,
    pub before_ban_benefits: serde_json::Value,
    pub calculation_method: String,
    pub estimated_usage: i64,
    pub wallet_collapsed: bool,
    pub status: FrozenStatus,
    pub reason: String,
    pub banned_by: Uuid,
    pub banned_at: DateTime<Utc>,
    pub restored_by: Option<Uuid>,
    pub restored_at: Option<DateTime<Utc>>,
}

// ── Usage ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct DailyUsage {
    pub user_id: Uuid,
    pub usage_date: NaiveDate,
    pub points_used: i64,
}

/// Caller-supplied context for a billed API call.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub request_id: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UsageRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub points: i64,
    pub request_id: Option<String>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}
