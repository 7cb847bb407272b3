use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::domain::expense::CostCenterId;
use crate::domain::flow::ApprovalFlow;

/// Picks the single applicable flow for an expense amount and cost center.
///
/// Matching: active flows whose amount band contains `amount` and whose
/// scope is either the expense's cost center or org-wide. Ranking: flows
/// scoped to the cost center beat org-wide ones; among equal specificity
/// (a configuration error, but it happens) the narrowest amount band wins,
/// with an unbounded band treated as infinitely wide, and the lowest id
/// breaks any remaining tie. The result is deterministic for any input
/// ordering.
pub fn select_flow(
    flows: &[ApprovalFlow],
    amount: Decimal,
    cost_center_id: CostCenterId,
) -> Option<&ApprovalFlow> {
    let mut matches: Vec<&ApprovalFlow> = flows
        .iter()
        .filter(|flow| {
            flow.is_active && flow.matches_amount(amount) && flow.matches_cost_center(cost_center_id)
        })
        .collect();

    matches.sort_by(|left, right| {
        right
            .is_scoped()
            .cmp(&left.is_scoped())
            .then_with(|| compare_band_width(left.band_width(), right.band_width()))
            .then_with(|| left.id.cmp(&right.id))
    });

    matches.into_iter().next()
}

fn compare_band_width(left: Option<Decimal>, right: Option<Decimal>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
