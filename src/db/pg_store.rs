use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::ledger_common::LedgerError;
use super::models::{
    ActivationCode, Card, FrozenPointsRecord, ServicePlan, UsageRecord, Wallet, WalletStatus,
};
use super::store::{LedgerStore, LedgerTx};

const WALLET_COLUMNS: &str = "id, user_id, total_points, available_points, used_points, \
     daily_max_points, degradation_guaranteed, daily_checkin_points, daily_checkin_points_max, \
     auto_refill_enabled, auto_refill_threshold, auto_refill_amount, last_auto_refill_time, \
     wallet_expires_at, status, last_checkin_date, created_at, updated_at";

const CARD_COLUMNS: &str = "id, user_id, source_type, source_id, points_amount, activated_at, \
     expires_at, daily_max_points, degradation_guaranteed, daily_checkin_points, \
     daily_checkin_points_max, auto_refill_enabled, auto_refill_threshold, auto_refill_amount, \
     plan_level, resets_history, reason, granted_by";

const PLAN_COLUMNS: &str = "id, name, level, points, validity_days, daily_max_points, \
     degradation_guaranteed, daily_checkin_points, daily_checkin_points_max, \
     auto_refill_enabled, auto_refill_threshold, auto_refill_amount, is_active";

const FROZEN_COLUMNS: &str = "id, user_id, banned_activation_code, frozen_points, \
     frozen_benefits, before_ban_wallet_state, before_ban_benefits, calculation_method, \
     estimated_usage, wallet_collapsed, status, reason, banned_by, banned_at, restored_by, \
     restored_at";

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx, LedgerError> {
        let tx = self.pool.begin().await?;
        Ok(PgLedgerTx { tx })
    }

    async fn auto_refill_candidates(&self) -> Result<Vec<Uuid>, LedgerError> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT user_id FROM wallets
            WHERE auto_refill_enabled = TRUE AND status = $1
            ORDER BY user_id
            "#,
        )
        .bind(WalletStatus::Active)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn wallet_for_update(&mut self, user_id: Uuid) -> Result<Option<Wallet>, LedgerError> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, Wallet>(&sql)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn insert_wallet(&mut self, w: &Wallet) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO wallets
                (id, user_id, total_points, available_points, used_points,
                 daily_max_points, degradation_guaranteed, daily_checkin_points, daily_checkin_points_max,
                 auto_refill_enabled, auto_refill_threshold, auto_refill_amount, last_auto_refill_time,
                 wallet_expires_at, status, last_checkin_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(w.id)
        .bind(w.user_id)
        .bind(w.total_points)
        .bind(w.available_points)
        .bind(w.used_points)
        .bind(w.benefits.daily_max_points)
        .bind(w.benefits.degradation_guaranteed)
        .bind(w.benefits.daily_checkin_points)
        .bind(w.benefits.daily_checkin_points_max)
        .bind(w.benefits.auto_refill_enabled)
        .bind(w.benefits.auto_refill_threshold)
        .bind(w.benefits.auto_refill_amount)
        .bind(w.last_auto_refill_time)
        .bind(w.wallet_expires_at)
        .bind(w.status)
        .bind(w.last_checkin_date)
        .bind(w.created_at)
        .bind(w.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_wallet(&mut self, w: &Wallet) -> Result<(), LedgerError> {
        let updated = sqlx::query(
            r#"
            UPDATE wallets SET
                total_points = $2, available_points = $3, used_points = $4,
                daily_max_points = $5, degradation_guaranteed = $6,
                daily_checkin_points = $7, daily_checkin_points_max = $8,
                auto_refill_enabled = $9, auto_refill_threshold = $10, auto_refill_amount = $11,
                last_auto_refill_time = $12, wallet_expires_at = $13, status = $14,
                last_checkin_date = $15, updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(w.user_id)
        .bind(w.total_points)
        .bind(w.available_points)
        .bind(w.used_points)
        .bind(w.benefits.daily_max_points)
        .bind(w.benefits.degradation_guaranteed)
        .bind(w.benefits.daily_checkin_points)
        .bind(w.benefits.daily_checkin_points_max)
        .bind(w.benefits.auto_refill_enabled)
        .bind(w.benefits.auto_refill_threshold)
        .bind(w.benefits.auto_refill_amount)
        .bind(w.last_auto_refill_time)
        .bind(w.wallet_expires_at)
        .bind(w.status)
        .bind(w.last_checkin_date)
        .execute(&mut *self.tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::Storage(format!("wallet {} vanished", w.user_id)));
        }
        Ok(())
    }

    async fn increment_points(&mut self, user_id: Uuid, points: i64) -> Result<bool, LedgerError> {
        let updated = sqlx::query(
            r#"
            UPDATE wallets
            SET total_points = total_points + $1, available_points = available_points + $1, updated_at = now()
            WHERE user_id = $2
            "#,
        )
        .bind(points)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn deduct_points(&mut self, user_id: Uuid, points: i64) -> Result<bool, LedgerError> {
        let updated = sqlx::query(
            r#"
            UPDATE wallets
            SET available_points = available_points - $1, used_points = used_points + $1, updated_at = now()
            WHERE user_id = $2 AND available_points >= $1
            "#,
        )
        .bind(points)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn cards_for_user(&mut self, user_id: Uuid) -> Result<Vec<Card>, LedgerError> {
        let sql = format!(
            "SELECT {CARD_COLUMNS} FROM redemption_records WHERE user_id = $1 ORDER BY activated_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, Card>(&sql)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows)
    }

    async fn insert_card(&mut self, c: &Card) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO redemption_records
                (id, user_id, source_type, source_id, points_amount, activated_at, expires_at,
                 daily_max_points, degradation_guaranteed, daily_checkin_points, daily_checkin_points_max,
                 auto_refill_enabled, auto_refill_threshold, auto_refill_amount,
                 plan_level, resets_history, reason, granted_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(c.id)
        .bind(c.user_id)
        .bind(c.source_type)
        .bind(&c.source_id)
        .bind(c.points_amount)
        .bind(c.activated_at)
        .bind(c.expires_at)
        .bind(c.benefits.daily_max_points)
        .bind(c.benefits.degradation_guaranteed)
        .bind(c.benefits.daily_checkin_points)
        .bind(c.benefits.daily_checkin_points_max)
        .bind(c.benefits.auto_refill_enabled)
        .bind(c.benefits.auto_refill_threshold)
        .bind(c.benefits.auto_refill_amount)
        .bind(c.plan_level)
        .bind(c.resets_history)
        .bind(&c.reason)
        .bind(c.granted_by)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn plan(&mut self, plan_id: Uuid) -> Result<Option<ServicePlan>, LedgerError> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM service_plans WHERE id = $1");
        let row = sqlx::query_as::<_, ServicePlan>(&sql)
            .bind(plan_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn insert_plan(&mut self, p: &ServicePlan) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO service_plans
                (id, name, level, points, validity_days, daily_max_points, degradation_guaranteed,
                 daily_checkin_points, daily_checkin_points_max, auto_refill_enabled,
                 auto_refill_threshold, auto_refill_amount, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(p.id)
        .bind(&p.name)
        .bind(p.level)
        .bind(p.points)
        .bind(p.validity_days)
        .bind(p.benefits.daily_max_points)
        .bind(p.benefits.degradation_guaranteed)
        .bind(p.benefits.daily_checkin_points)
        .bind(p.benefits.daily_checkin_points_max)
        .bind(p.benefits.auto_refill_enabled)
        .bind(p.benefits.auto_refill_threshold)
        .bind(p.benefits.auto_refill_amount)
        .bind(p.is_active)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_plan_active(&mut self, plan_id: Uuid, active: bool) -> Result<bool, LedgerError> {
        let updated = sqlx::query("UPDATE service_plans SET is_active = $1 WHERE id = $2")
            .bind(active)
            .bind(plan_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn activation_code_for_update(
        &mut self,
        code: &str,
    ) -> Result<Option<ActivationCode>, LedgerError> {
        let row = sqlx::query_as::<_, ActivationCode>(
            r#"
            SELECT code, plan_id, status, expires_at, used_by, used_at
            FROM activation_codes WHERE code = $1
            FOR UPDATE
            "#,
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_activation_code(&mut self, c: &ActivationCode) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO activation_codes (code, plan_id, status, expires_at, used_by, used_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&c.code)
        .bind(c.plan_id)
        .bind(c.status)
        .bind(c.expires_at)
        .bind(c.used_by)
        .bind(c.used_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_code_used(
        &mut self,
        code: &str,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE activation_codes SET status = 'used', used_by = $1, used_at = $2 WHERE code = $3",
        )
        .bind(user_id)
        .bind(at)
        .bind(code)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn open_frozen_records(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<FrozenPointsRecord>, LedgerError> {
        let sql = format!(
            "SELECT {FROZEN_COLUMNS} FROM frozen_points_records WHERE user_id = $1 AND status = 'frozen' FOR UPDATE"
        );
        let rows = sqlx::query_as::<_, FrozenPointsRecord>(&sql)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows)
    }

    async fn frozen_records(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<FrozenPointsRecord>, LedgerError> {
        let sql = format!(
            "SELECT {FROZEN_COLUMNS} FROM frozen_points_records WHERE user_id = $1 ORDER BY banned_at DESC"
        );
        let rows = sqlx::query_as::<_, FrozenPointsRecord>(&sql)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows)
    }

    async fn insert_frozen_record(&mut self, r: &FrozenPointsRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO frozen_points_records
                (id, user_id, banned_activation_code, frozen_points, frozen_benefits,
                 before_ban_wallet_state, before_ban_benefits, calculation_method, estimated_usage,
                 wallet_collapsed, status, reason, banned_by, banned_at, restored_by, restored_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(r.id)
        .bind(r.user_id)
        .bind(&r.banned_activation_code)
        .bind(r.frozen_points)
        .bind(&r.frozen_benefits)
        .bind(&r.before_ban_wallet_state)
        .bind(&r.before_ban_benefits)
        .bind(&r.calculation_method)
        .bind(r.estimated_usage)
        .bind(r.wallet_collapsed)
        .bind(r.status)
        .bind(&r.reason)
        .bind(r.banned_by)
        .bind(r.banned_at)
        .bind(r.restored_by)
        .bind(r.restored_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_frozen_restored(
        &mut self,
        record_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let updated = sqlx::query(
            r#"
            UPDATE frozen_points_records
            SET status = 'restored', restored_by = $1, restored_at = $2
            WHERE id = $3 AND status = 'frozen'
            "#,
        )
        .bind(admin_id)
        .bind(at)
        .bind(record_id)
        .execute(&mut *self.tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::Storage(format!(
                "frozen record {record_id} changed underneath unban"
            )));
        }
        Ok(())
    }

    async fn daily_usage(&mut self, user_id: Uuid, date: NaiveDate) -> Result<i64, LedgerError> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT points_used FROM daily_usage WHERE user_id = $1 AND usage_date = $2",
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|(p,)| p).unwrap_or(0))
    }

    async fn add_daily_usage(
        &mut self,
        user_id: Uuid,
        date: NaiveDate,
        points: i64,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO daily_usage (user_id, usage_date, points_used)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, usage_date)
            DO UPDATE SET points_used = daily_usage.points_used + EXCLUDED.points_used
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(points)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_usage_record(&mut self, r: &UsageRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (id, user_id, points, request_id, model, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(r.id)
        .bind(r.user_id)
        .bind(r.points)
        .bind(&r.request_id)
        .bind(&r.model)
        .bind(r.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
