//! Split-Intent Planner
//!
//! Pure function: invoice + Mark's balances + hub-custodied liquidity ->
//! {origin, intents}. Deterministic by construction: candidate origins are
//! walked in ascending chain order, destination ties break on ascending
//! chain id, and nothing here reads the clock.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::amount::Amount;
use crate::hub::Invoice;

/// One intent Mark submits to the hub: an offer of `amount` of the ticker
/// from `origin`, settleable on any chain in `destinations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IntentParams {
    pub origin: u64,
    pub destinations: Vec<u64>,
    pub ticker_hash: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIntentPlan {
    pub origin_domain: u64,
    pub total_allocated: Amount,
    pub intents: Vec<IntentParams>,
}

pub struct PlannerInput<'a> {
    pub invoice: &'a Invoice,
    /// Per-origin minimum purchase amounts from the hub; falls back to the
    /// invoice amount for origins the hub did not price.
    pub min_amounts: &'a BTreeMap<u64, Amount>,
    /// Mark's balances of the invoice ticker: chain -> canonical amount.
    pub balances: &'a BTreeMap<u64, Amount>,
    /// Hub-custodied liquidity of the ticker: chain -> canonical amount.
    pub custodied: &'a BTreeMap<u64, Amount>,
    /// Top-N settlement domains.
    pub supported_domains: &'a [u64],
    pub max_destinations: usize,
    /// Plans allocating less than this are discarded (caller retries later).
    pub min_allocation: Amount,
}

/// Candidate evaluation for one origin.
struct Candidate {
    origin: u64,
    fully_allocated: bool,
    intent_count: usize,
    top_n_usage: usize,
    total_allocated: Amount,
    allocations: Vec<(u64, Amount)>,
}

impl Candidate {
    /// Lexicographic preference: full coverage first, then fewer splits, then
    /// more top-N destinations, then larger allocation. Ascending origin id
    /// breaks exact ties deterministically.
    fn beats(&self, other: &Candidate) -> bool {
        (
            !self.fully_allocated,
            self.intent_count,
            std::cmp::Reverse(self.top_n_usage),
            std::cmp::Reverse(&self.total_allocated),
            self.origin,
        ) < (
            !other.fully_allocated,
            other.intent_count,
            std::cmp::Reverse(other.top_n_usage),
            std::cmp::Reverse(&other.total_allocated),
            other.origin,
        )
    }
}

/// Plan the minimal set of intents that purchases an invoice.
///
/// Returns None when no origin can allocate anything worth submitting (no
/// balances, no custodied liquidity on any destination, or the best
/// allocation falls below the configured minimum).
pub fn plan_split_intents(input: &PlannerInput<'_>) -> Option<SplitIntentPlan> {
    let mut best: Option<Candidate> = None;

    for (&origin, balance) in input.balances {
        if balance.is_zero() {
            continue;
        }

        let target = input
            .min_amounts
            .get(&origin)
            .unwrap_or(&input.invoice.amount)
            .clone();
        if target.is_zero() {
            continue;
        }

        // Destinations ordered by custodied liquidity descending, zero
        // liquidity dropped, origin excluded (nothing to settle there),
        // ascending chain id on ties.
        let mut destinations: Vec<(u64, &Amount)> = input
            .custodied
            .iter()
            .filter(|&(&chain, custodied)| chain != origin && !custodied.is_zero())
            .map(|(&chain, custodied)| (chain, custodied))
            .collect();
        destinations.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(&b.0)));

        let mut remaining_balance = balance.clone();
        let mut remaining_invoice = target.clone();
        let mut allocations: Vec<(u64, Amount)> = Vec::new();

        for (chain, custodied) in destinations {
            if allocations.len() >= input.max_destinations
                || remaining_balance.is_zero()
                || remaining_invoice.is_zero()
            {
                break;
            }
            let slice = remaining_balance
                .clone()
                .min(custodied.clone())
                .min(remaining_invoice.clone());
            if slice.is_zero() {
                continue;
            }
            remaining_balance = remaining_balance.saturating_sub(&slice);
            remaining_invoice = remaining_invoice.saturating_sub(&slice);
            allocations.push((chain, slice));
        }

        if allocations.is_empty() {
            continue;
        }

        let total_allocated = allocations
            .iter()
            .fold(Amount::zero(), |acc, (_, amount)| acc.checked_add(amount));
        let top_n_usage = allocations
            .iter()
            .filter(|(chain, _)| input.supported_domains.contains(chain))
            .count();

        let candidate = Candidate {
            origin,
            fully_allocated: remaining_invoice.is_zero(),
            intent_count: allocations.len(),
            top_n_usage,
            total_allocated,
            allocations,
        };

        match &best {
            Some(current) if !candidate.beats(current) => {}
            _ => best = Some(candidate),
        }
    }

    let winner = best?;
    if winner.total_allocated < input.min_allocation {
        return None;
    }

    // Every intent carries the full candidate destination set so the hub may
    // settle on any of them.
    let mut destination_set: BTreeSet<u64> = input.invoice.destinations.iter().copied().collect();
    destination_set.extend(
        input
            .custodied
            .iter()
            .filter(|(_, custodied)| !custodied.is_zero())
            .map(|(&chain, _)| chain),
    );
    destination_set.insert(winner.origin);
    let destinations: Vec<u64> = destination_set.into_iter().collect();

    let intents = winner
        .allocations
        .iter()
        .map(|(_, amount)| IntentParams {
            origin: winner.origin,
            destinations: destinations.clone(),
            ticker_hash: input.invoice.ticker_hash.clone(),
            amount: amount.clone(),
        })
        .collect();

    Some(SplitIntentPlan {
        origin_domain: winner.origin,
        total_allocated: winner.total_allocated,
        intents,
    })
}
