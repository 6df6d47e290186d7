//! Pure planning for a ban. `Ban` applies the plan inside a transaction;
//! `PreviewBan` returns it untouched, so both always agree.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use uuid::Uuid;

use super::benefits::merge;
use super::consumption::{CardConsumption, ConsumptionBreakdown, consumption_for};
use crate::db::ledger_common::LedgerError;
use crate::db::models::{Benefits, Card, Wallet};

#[derive(Debug, Clone)]
pub struct BanPlan {
    pub target: CardConsumption,
    pub breakdown: ConsumptionBreakdown,
    /// Points removed from `available_points` and `total_points`.
    pub frozen_points: i64,
    pub frozen_benefits: Benefits,
    pub benefits_after: Benefits,
    /// No other card keeps the wallet alive.
    pub collapses: bool,
    pub calculation_method: String,
}

fn cards_by_id(cards: &[Card]) -> HashMap<Uuid, &Card> {
    cards.iter().map(|c| (c.id, c)).collect()
}

/// Plans freezing `code` out of `wallet` at `now`. `banned` holds codes that
/// already have an open frozen record; they contribute no benefits, and
/// neither do cards already expired at `now`.
pub fn plan_ban(
    wallet: &Wallet,
    cards: &[Card],
    banned: &HashSet<String>,
    code: &str,
    now: DateTime<Utc>,
) -> Result<BanPlan, LedgerError> {
    let (target, breakdown) = consumption_for(cards, wallet.used_points, code)?;
    let by_id = cards_by_id(cards);

    let frozen_points = target.remaining.min(wallet.available_points).max(0);

    let survivors: Vec<&Benefits> = breakdown
        .entries
        .iter()
        .filter(|e| {
            e.remaining > 0
                && e.expires_at > now
                && e.source_id != code
                && !banned.contains(&e.source_id)
        })
        .filter_map(|e| by_id.get(&e.card_id).map(|c| &c.benefits))
        .collect();
    let collapses = survivors.is_empty();
    let benefits_after = merge(survivors);

    let frozen_benefits = by_id
        .get(&target.card_id)
        .map(|c| c.benefits.clone())
        .unwrap_or_default();

    let mut calculation_method = breakdown.trace(code);
    if frozen_points < target.remaining {
        let _ = write!(
            calculation_method,
            "; freeze clamped from {} to available_points={}",
            target.remaining, wallet.available_points
        );
    }
    if collapses {
        calculation_method.push_str("; no other card has remaining points, wallet collapses");
    }

    Ok(BanPlan {
        target,
        breakdown,
        frozen_points,
        frozen_benefits,
        benefits_after,
        collapses,
        calculation_method,
    })
}

impl BanPlan {
    pub fn apply(&self, wallet: &mut Wallet, now: DateTime<Utc>) {
        wallet.available_points -= self.frozen_points;
        wallet.total_points -= self.frozen_points;
        if self.collapses {
            wallet.collapse(now);
        } else {
            wallet.benefits = self.benefits_after.clone();
        }
        wallet.updated_at = now;
    }
}

/// Benefits once `restored` is unbanned: every unexpired candidate with points
/// left and no open frozen record, plus the restored card itself if unexpired.
pub fn restored_benefits(
    cards: &[Card],
    used_points: i64,
    still_banned: &HashSet<String>,
    restored: &str,
    now: DateTime<Utc>,
) -> Benefits {
    let breakdown = super::consumption::calculate(cards, used_points);
    let by_id = cards_by_id(cards);
    let keep: Vec<&Benefits> = breakdown
        .entries
        .iter()
        .filter(|e| e.expires_at > now)
        .filter(|e| {
            e.source_id == restored || (e.remaining > 0 && !still_banned.contains(&e.source_id))
        })
        .filter_map(|e| by_id.get(&e.card_id).map(|c| &c.benefits))
        .collect();
    merge(keep)
}

/// Benefits of every unbanned, unexpired candidate with points left.
pub fn active_benefits(
    cards: &[Card],
    used_points: i64,
    banned: &HashSet<String>,
    now: DateTime<Utc>,
) -> Benefits {
    let breakdown = super::consumption::calculate(cards, used_points);
    let by_id = cards_by_id(cards);
    let keep: Vec<&Benefits> = breakdown
        .entries
        .iter()
        .filter(|e| e.remaining > 0 && e.expires_at > now && !banned.contains(&e.source_id))
        .filter_map(|e| by_id.get(&e.card_id).map(|c| &c.benefits))
        .collect();
    merge(keep)
}
