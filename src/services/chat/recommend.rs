use crate::models::plan::ServicePlan;

use super::steps::BudgetBracket;

/// Pick a plan for a budget bracket.
///
/// Inside the bracket the highlighted plan wins, else the first in display
/// order. With nothing in range, a capped bracket falls back to the cheapest
/// plan and the open-ended one to the highlighted or most expensive plan.
/// Returns `None` only when there is no active plan.
pub fn recommend_plan(bracket: BudgetBracket, plans: &[ServicePlan]) -> Option<&ServicePlan> {
    let active: Vec<&ServicePlan> = plans.iter().filter(|p| p.active).collect();
    if active.is_empty() {
        return None;
    }

    let in_range: Vec<&ServicePlan> = active
        .iter()
        .copied()
        .filter(|p| bracket.contains(p.price))
        .collect();

    if !in_range.is_empty() {
        return in_range
            .iter()
            .find(|p| p.highlight)
            .or_else(|| in_range.first())
            .copied();
    }

    let (_, max) = bracket.range();
    if max.is_some() {
        active
            .iter()
            .copied()
            .min_by(|a, b| a.price.total_cmp(&b.price))
    } else {
        active.iter().copied().find(|p| p.highlight).or_else(|| {
            active
                .iter()
                .copied()
                .max_by(|a, b| a.price.total_cmp(&b.price))
        })
    }
}
