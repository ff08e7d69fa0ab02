//! Running per-currency statistics over a record stream.

use crate::{Result, source::Record};
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Numeric record field statistics are kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Field {
    Amount,
    Fee,
}

impl Field {
    pub const ALL: [Field; 2] = [Field::Amount, Field::Fee];

    pub fn value(&self, record: &Record) -> f64 {
        match self {
            Field::Amount => record.amount,
            Field::Fee => record.fee,
        }
    }

    /// Capitalized name used in metric names.
    pub fn label(&self) -> &'static str {
        match self {
            Field::Amount => "Amount",
            Field::Fee => "Fee",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the running minimum treats its starting value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinPolicy {
    /// A minimum of `0` means "nothing seen yet" and is replaced by the next
    /// value. A real zero therefore only survives as the minimum when it is
    /// the only value seen. Matches the statistics already reported by
    /// earlier agent deployments.
    #[default]
    Legacy,
    /// The minimum is the smallest value actually folded in.
    Observed,
}

/// Running statistics for one (currency, field) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Accumulator {
    pub min: f64,
    pub max: f64,
    pub total: f64,
    pub count: u64,
    pub sum_of_squares: f64,
}

impl Accumulator {
    pub fn fold(&mut self, value: f64, policy: MinPolicy) {
        let replace_min = match policy {
            MinPolicy::Legacy => self.min == 0.0 || value < self.min,
            MinPolicy::Observed => self.count == 0 || value < self.min,
        };
        if replace_min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.total += value;
        self.count += 1;
        self.sum_of_squares += value * value;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }

    /// Population variance.
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        Some((self.sum_of_squares / self.count as f64 - mean * mean).max(0.0))
    }
}

/// Accumulators for one record type, keyed by (currency, field).
///
/// Entries are created the first time a pair is seen and live until the
/// aggregation is dropped at the end of the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    policy: MinPolicy,
    accumulators: BTreeMap<(String, Field), Accumulator>,
}

impl Aggregation {
    pub fn new(policy: MinPolicy) -> Self {
        Self {
            policy,
            accumulators: BTreeMap::new(),
        }
    }

    /// Fold one record into the amount and fee accumulators of its currency.
    pub fn fold(&mut self, record: &Record) {
        for field in Field::ALL {
            self.accumulators
                .entry((record.currency.clone(), field))
                .or_default()
                .fold(field.value(record), self.policy);
        }
    }

    pub fn get(&self, currency: &str, field: Field) -> Option<&Accumulator> {
        self.accumulators.get(&(currency.to_string(), field))
    }

    /// Number of records folded in.
    pub fn record_count(&self) -> u64 {
        self.iter()
            .filter(|(_, field, _)| *field == Field::Amount)
            .map(|(_, _, acc)| acc.count)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Entries ordered by currency, then field.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Field, &Accumulator)> {
        self.accumulators
            .iter()
            .map(|((currency, field), acc)| (currency.as_str(), *field, acc))
    }
}

/// Consume `records` in arrival order. The first error aborts the fold.
pub async fn aggregate<S>(records: S, policy: MinPolicy) -> Result<Aggregation>
where
    S: Stream<Item = Result<Record>>,
{
    records
        .try_fold(Aggregation::new(policy), |mut aggregation, record| async move {
            aggregation.fold(&record);
            Ok(aggregation)
        })
        .await
}
