//! Virtual consumption: attributes a wallet's aggregate `used_points` back to
//! the activation-code cards that funded it.
//!
//! Nothing about per-card usage is stored at spend time. The attribution is
//! re-derived on every call from `(cards, used_points)`: candidates are walked
//! soonest-to-expire first (smaller grants first on a tie) and each absorbs as
//! much of the counter as it can. The result is stable for a given wallet
//! state, which is all a ban needs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use uuid::Uuid;

use crate::db::ledger_common::LedgerError;
use crate::db::models::{Card, SourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionStatus {
    Unused,
    PartiallyConsumed,
    FullyConsumed,
}

impl ConsumptionStatus {
    fn of(consumed: i64, points_amount: i64) -> Self {
        if consumed <= 0 {
            ConsumptionStatus::Unused
        } else if consumed >= points_amount {
            ConsumptionStatus::FullyConsumed
        } else {
            ConsumptionStatus::PartiallyConsumed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConsumptionStatus::Unused => "unused",
            ConsumptionStatus::PartiallyConsumed => "partially_consumed",
            ConsumptionStatus::FullyConsumed => "fully_consumed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardConsumption {
    pub card_id: Uuid,
    pub source_id: String,
    pub points_amount: i64,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: i64,
    pub remaining: i64,
    pub status: ConsumptionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumptionBreakdown {
    pub used_points: i64,
    /// Usage left over once every candidate is exhausted (funded by gifts,
    /// check-ins or refills, which are not candidates).
    pub unattributed: i64,
    /// Activation time of the most recent same-level redemption, if any.
    pub reset_at: Option<DateTime<Utc>>,
    /// Candidates in consumption order.
    pub entries: Vec<CardConsumption>,
}

impl ConsumptionBreakdown {
    pub fn entry(&self, source_id: &str) -> Option<&CardConsumption> {
        self.entries.iter().find(|e| e.source_id == source_id)
    }

    /// Human-readable account of how the counter was split, stored with ban records.
    pub fn trace(&self, target: &str) -> String {
        let mut out = format!(
            "expiry-ordered allocation of used_points={} over {} activation card(s)",
            self.used_points,
            self.entries.len()
        );
        if let Some(reset_at) = self.reset_at {
            let _ = write!(out, " (history reset at {})", reset_at.to_rfc3339());
        }
        for (i, e) in self.entries.iter().enumerate() {
            let marker = if e.source_id == target { " <- target" } else { "" };
            let _ = write!(
                out,
                "; #{} {} expires {}: {}/{} consumed, {} remaining, {}{}",
                i + 1,
                e.source_id,
                e.expires_at.format("%Y-%m-%d %H:%M:%S"),
                e.consumed,
                e.points_amount,
                e.remaining,
                e.status.as_str(),
                marker
            );
        }
        if self.unattributed > 0 {
            let _ = write!(out, "; {} point(s) unattributed", self.unattributed);
        }
        out
    }
}

/// Activation-code cards still relevant to attribution, in consumption order.
fn candidates(cards: &[Card]) -> (Vec<&Card>, Option<DateTime<Utc>>) {
    let mut picked: Vec<&Card> = cards
        .iter()
        .filter(|c| c.source_type == SourceType::ActivationCode)
        .collect();

    // A same-level redemption starts a fresh history: older cards no longer count.
    let reset_at = picked
        .iter()
        .filter(|c| c.resets_history)
        .map(|c| c.activated_at)
        .max();
    if let Some(reset_at) = reset_at {
        picked.retain(|c| c.activated_at >= reset_at);
    }

    picked.sort_by(|a, b| {
        a.expires_at
            .cmp(&b.expires_at)
            .then(a.points_amount.cmp(&b.points_amount))
            .then(a.activated_at.cmp(&b.activated_at))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    (picked, reset_at)
}

pub fn calculate(cards: &[Card], used_points: i64) -> ConsumptionBreakdown {
    let (ordered, reset_at) = candidates(cards);
    let mut remaining_usage = used_points.max(0);
    let mut entries = Vec::with_capacity(ordered.len());

    for card in ordered {
        let consumed = remaining_usage.min(card.points_amount.max(0));
        remaining_usage -= consumed;
        entries.push(CardConsumption {
            card_id: card.id,
            source_id: card.source_id.clone(),
            points_amount: card.points_amount,
            activated_at: card.activated_at,
            expires_at: card.expires_at,
            consumed,
            remaining: card.points_amount - consumed,
            status: ConsumptionStatus::of(consumed, card.points_amount),
        });
    }

    ConsumptionBreakdown {
        used_points: used_points.max(0),
        unattributed: remaining_usage,
        reset_at,
        entries,
    }
}

/// Breakdown plus the entry for `source_id`, or `CardNotFound`.
pub fn consumption_for(
    cards: &[Card],
    used_points: i64,
    source_id: &str,
) -> Result<(CardConsumption, ConsumptionBreakdown), LedgerError> {
    let breakdown = calculate(cards, used_points);
    let target = breakdown
        .entry(source_id)
        .cloned()
        .ok_or_else(|| LedgerError::CardNotFound(source_id.to_string()))?;
    Ok((target, breakdown))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::Benefits;
    use chrono::Duration;

    pub(crate) fn card(
        source_id: &str,
        points: i64,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Card {
        Card {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            source_type: SourceType::ActivationCode,
            source_id: source_id.to_string(),
            points_amount: points,
            activated_at,
            expires_at,
            benefits: Benefits::default(),
            plan_level: 1,
            resets_history: false,
            reason: String::new(),
            granted_by: None,
        }
    }

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_earlier_expiry_consumed_first() {
        let t = base();
        let cards = vec![
            card("B", 50, t, t + Duration::days(2)),
            card("A", 100, t, t + Duration::days(1)),
        ];
        let b = calculate(&cards, 120);
        assert_eq!(b.entries[0].source_id, "A");
        assert_eq!((b.entries[0].consumed, b.entries[0].remaining), (100, 0));
        assert_eq!(b.entries[0].status, ConsumptionStatus::FullyConsumed);
        assert_eq!((b.entries[1].consumed, b.entries[1].remaining), (20, 30));
        assert_eq!(b.entries[1].status, ConsumptionStatus::PartiallyConsumed);
        assert_eq!(b.unattributed, 0);
    }

    #[test]
    fn test_equal_expiry_smaller_card_first() {
        let t = base();
        let exp = t + Duration::days(30);
        let cards = vec![card("BIG", 30, t, exp), card("SMALL", 10, t, exp)];
        let b = calculate(&cards, 15);
        let small = b.entry("SMALL").unwrap();
        let big = b.entry("BIG").unwrap();
        assert_eq!((small.consumed, small.remaining), (10, 0));
        assert_eq!((big.consumed, big.remaining), (5, 25));
        assert_eq!(b.entries[0].source_id, "SMALL");
    }

    #[test]
    fn test_usage_stops_once_counter_is_exhausted() {
        let t = base();
        let cards = vec![
            card("A", 10, t, t + Duration::days(1)),
            card("B", 10, t, t + Duration::days(2)),
            card("C", 10, t, t + Duration::days(3)),
        ];
        let b = calculate(&cards, 10);
        assert_eq!(b.entry("A").unwrap().status, ConsumptionStatus::FullyConsumed);
        assert_eq!(b.entry("B").unwrap().consumed, 0);
        assert_eq!(b.entry("B").unwrap().status, ConsumptionStatus::Unused);
        assert_eq!(b.entry("C").unwrap().remaining, 10);
    }

    #[test]
    fn test_only_activation_codes_are_candidates() {
        let t = base();
        let mut gift = card("GIFT", 500, t, t + Duration::hours(1));
        gift.source_type = SourceType::AdminGift;
        let cards = vec![gift, card("A", 100, t, t + Duration::days(1))];
        let b = calculate(&cards, 40);
        assert_eq!(b.entries.len(), 1);
        assert_eq!(b.entry("A").unwrap().consumed, 40);
        assert!(b.entry("GIFT").is_none());
    }

    #[test]
    fn test_usage_beyond_all_cards_is_unattributed() {
        let t = base();
        let cards = vec![card("A", 10, t, t + Duration::days(1))];
        let b = calculate(&cards, 25);
        assert_eq!(b.entry("A").unwrap().remaining, 0);
        assert_eq!(b.unattributed, 15);
    }

    #[test]
    fn test_same_level_redemption_discards_older_cards() {
        let t = base();
        let old = card("OLD", 100, t, t + Duration::days(1));
        let mut renewed = card("NEW", 100, t + Duration::days(5), t + Duration::days(35));
        renewed.resets_history = true;
        let later = card("LATER", 50, t + Duration::days(6), t + Duration::days(40));
        let b = calculate(&[old, renewed, later], 30);
        assert_eq!(b.reset_at, Some(t + Duration::days(5)));
        assert!(b.entry("OLD").is_none());
        assert_eq!(b.entry("NEW").unwrap().consumed, 30);
        assert_eq!(b.entry("LATER").unwrap().consumed, 0);
    }

    #[test]
    fn test_most_recent_reset_wins() {
        let t = base();
        let mut first = card("R1", 10, t + Duration::days(1), t + Duration::days(10));
        first.resets_history = true;
        let mut second = card("R2", 10, t + Duration::days(2), t + Duration::days(10));
        second.resets_history = true;
        let b = calculate(&[first, second], 5);
        assert_eq!(b.entries.len(), 1);
        assert_eq!(b.entries[0].source_id, "R2");
    }

    #[test]
    fn test_consumption_for_unknown_card() {
        let t = base();
        let cards = vec![card("A", 10, t, t + Duration::days(1))];
        let err = consumption_for(&cards, 0, "NOPE").unwrap_err();
        assert!(matches!(err, LedgerError::CardNotFound(code) if code == "NOPE"));
    }

    #[test]
    fn test_repeated_calculation_is_identical() {
        let t = base();
        let cards = vec![
            card("A", 70, t, t + Duration::days(3)),
            card("B", 30, t, t + Duration::days(3)),
            card("C", 30, t + Duration::hours(1), t + Duration::days(3)),
        ];
        let first = calculate(&cards, 80);
        let second = calculate(&cards, 80);
        assert_eq!(first, second);
        assert_eq!(first.trace("B"), second.trace("B"));
    }

    #[test]
    fn test_trace_marks_target() {
        let t = base();
        let cards = vec![card("A", 10, t, t + Duration::days(1))];
        let trace = calculate(&cards, 4).trace("A");
        assert!(trace.contains("used_points=4"));
        assert!(trace.contains("4/10 consumed"));
        assert!(trace.contains("<- target"));
    }
}
