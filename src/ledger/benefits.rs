use crate::db::models::Benefits;

/// Folds the benefits of every still-valid card into one effective set.
///
/// Numeric caps take the most generous value. Auto-refill is enabled if any
/// card enables it, and the threshold/amount come from the last enabling card
/// in iteration order. An empty input yields `Benefits::default()`.
pub fn merge<'a, I>(cards: I) -> Benefits
where
    I: IntoIterator<Item = &'a Benefits>,
{
    let mut merged = Benefits::default();
    for b in cards {
        merged.daily_max_points = merged.daily_max_points.max(b.daily_max_points);
        merged.degradation_guaranteed = merged.degradation_guaranteed.max(b.degradation_guaranteed);
        merged.daily_checkin_points = merged.daily_checkin_points.max(b.daily_checkin_points);
        merged.daily_checkin_points_max =
            merged.daily_checkin_points_max.max(b.daily_checkin_points_max);
        if b.auto_refill_enabled {
            merged.auto_refill_enabled = true;
            merged.auto_refill_threshold = b.auto_refill_threshold;
            merged.auto_refill_amount = b.auto_refill_amount;
        }
    }
    merged
}
