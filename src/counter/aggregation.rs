//! Pure counter math: combination expansion over dimension fields and the
//! canonical query-string encoding under which counts accumulate.

use crate::storage::types::{Countable, FieldValue};
use std::collections::{BTreeMap, HashSet};
use url::form_urlencoded;

/// One criterion tuple: an ordered list of field selectors, each either a
/// single field name or several alternative names joined by `|`.
pub type CounterCriteria = Vec<String>;

/// One count adjustment produced by [`calculate_counters`] and applied by the
/// counter store, keyed by `(table_name, query_string)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDelta {
    pub table_name: String,
    pub query_string: String,
    pub count: u64,
}

/// Canonical encoding of one dimension assignment.
///
/// Each pair is URL-encoded on its own and the encoded `key=value` strings
/// are then sorted, so the same assignment always reaches the same counter
/// row no matter the order the dimensions were visited in.
pub fn canonical_query_string(pairs: &[(&str, FieldValue)]) -> String {
    let mut encoded: Vec<String> = pairs
        .iter()
        .map(|(name, value)| {
            form_urlencoded::Serializer::new(String::new())
                .append_pair(name, value.as_key_str())
                .finish()
        })
        .collect();
    encoded.sort();
    encoded.join("&")
}

/// Expands `records` against every criterion tuple and accumulates one count
/// per distinct query string, with the unconditional table total under the
/// empty string. The increment and revert paths both run this exact function
/// so the two stay arithmetic inverses of each other.
pub fn calculate_counters<R: Countable>(
    records: &[R],
    criteria_list: &[CounterCriteria],
) -> Vec<CounterDelta> {
    let mut tally: BTreeMap<String, u64> = BTreeMap::new();
    tally.insert(String::new(), records.len() as u64);

    for criteria in criteria_list {
        for record in records {
            for combination in dimension_combinations(record, criteria) {
                *tally
                    .entry(canonical_query_string(&combination))
                    .or_insert(0) += 1;
            }
        }
    }

    tally
        .into_iter()
        .map(|(query_string, count)| CounterDelta {
            table_name: R::TABLE.to_owned(),
            query_string,
            count,
        })
        .collect()
}

/// Cartesian product of selector values for one record, left to right.
/// Within one selector, alternatives whose value already appeared for this
/// record are skipped, so `from|to` yields a single branch when both fields
/// hold the same value.
fn dimension_combinations<'a, R: Countable>(
    record: &R,
    criteria: &'a CounterCriteria,
) -> Vec<Vec<(&'a str, FieldValue)>> {
    let mut combinations: Vec<Vec<(&str, FieldValue)>> = Vec::new();

    for selector in criteria {
        let mut seen: HashSet<FieldValue> = HashSet::new();
        let mut expanded = Vec::new();

        for field in selector.split('|') {
            let value = record.field(field);
            if !seen.insert(value.clone()) {
                continue;
            }

            if combinations.is_empty() {
                expanded.push(vec![(selector.as_str(), value)]);
            } else {
                for combination in &combinations {
                    let mut grown = combination.clone();
                    grown.push((selector.as_str(), value.clone()));
                    expanded.push(grown);
                }
            }
        }

        combinations = expanded;
    }

    combinations
}
