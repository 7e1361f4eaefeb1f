//! Top-K run selection
//!
//! **Problem**: `search_runs(order_by, max_results = K)` over a large
//! experiment does not need a full sort.
//!
//! **Solution**: bounded max-heap over precomputed rank keys, O(N log K).
//!
//! Ordering rules:
//! - explicit clauses first, in order
//! - a run without the sort key ranks after every run that has it, in both
//!   directions (nulls last)
//! - then the default secondary ordering: `start_time DESC`, `run_id ASC`

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::order::{OrderClause, OrderDirection, OrderKey};
use super::RunRecord;

#[derive(Debug, Clone, PartialEq)]
enum SortValue {
    Number(f64),
    Text(String),
    Time(i64),
    Missing,
}

impl SortValue {
    fn compare(&self, other: &Self, direction: OrderDirection) -> Ordering {
        let ord = match (self, other) {
            (Self::Missing, Self::Missing) => return Ordering::Equal,
            (Self::Missing, _) => return Ordering::Greater,
            (_, Self::Missing) => return Ordering::Less,
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            // Mixed kinds cannot occur for a single key.
            _ => Ordering::Equal,
        };
        match direction {
            OrderDirection::Asc => ord,
            OrderDirection::Desc => ord.reverse(),
        }
    }
}

/// Rank key of one run; smaller ranks first.
#[derive(Debug)]
struct RankKey {
    values: Vec<(SortValue, OrderDirection)>,
    started_at: SortValue,
    run_id: String,
}

impl RankKey {
    fn new(run: &RunRecord, clauses: &[OrderClause]) -> Self {
        let values = clauses
            .iter()
            .map(|clause| (sort_value(run, &clause.key), clause.direction))
            .collect();
        Self {
            values,
            started_at: sort_value(run, &OrderKey::StartTime),
            run_id: run.run_id().to_string(),
        }
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((a, dir), (b, _)) in self.values.iter().zip(&other.values) {
            let ord = a.compare(b, *dir);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.started_at
            .compare(&other.started_at, OrderDirection::Desc)
            .then_with(|| self.run_id.cmp(&other.run_id))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Max-heap item: the worst of the current top K sits on top.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeapItem {
    key: RankKey,
    index: usize,
}

fn sort_value(run: &RunRecord, key: &OrderKey) -> SortValue {
    match key {
        OrderKey::Metric(name) => run.metric(name).map_or(SortValue::Missing, SortValue::Number),
        OrderKey::Param(name) => run
            .params()
            .get(name)
            .map_or(SortValue::Missing, |v| SortValue::Text(v.clone())),
        OrderKey::Tag(name) => run
            .tag(name)
            .map_or(SortValue::Missing, |v| SortValue::Text(v.to_string())),
        OrderKey::StartTime => run
            .started_at()
            .map_or(SortValue::Missing, |t| SortValue::Time(t.timestamp_micros())),
        OrderKey::EndTime => run
            .ended_at()
            .map_or(SortValue::Missing, |t| SortValue::Time(t.timestamp_micros())),
        OrderKey::RunId => SortValue::Text(run.run_id().to_string()),
        OrderKey::Status => SortValue::Text(format!("{:?}", run.status())),
    }
}

/// Order runs by `clauses` and keep at most `limit` of them.
///
/// `limit = None` returns every run, fully ordered.
#[must_use]
pub fn rank_runs(runs: Vec<RunRecord>, clauses: &[OrderClause], limit: Option<usize>) -> Vec<RunRecord> {
    let k = limit.unwrap_or(runs.len()).min(runs.len());
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<HeapItem> = BinaryHeap::with_capacity(k);
    for (index, run) in runs.iter().enumerate() {
        let item = HeapItem {
            key: RankKey::new(run, clauses),
            index,
        };
        if heap.len() < k {
            heap.push(item);
        } else if let Some(top) = heap.peek() {
            if item.key < top.key {
                heap.pop();
                heap.push(item);
            }
        }
    }

    let mut slots: Vec<Option<RunRecord>> = runs.into_iter().map(Some).collect();
    heap.into_sorted_vec()
        .into_iter()
        .filter_map(|item| slots[item.index].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn run(id: &str, second: u32, rmse: Option<f64>) -> RunRecord {
        let mut builder = RunRecord::builder(id, "1")
            .started_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap());
        if let Some(rmse) = rmse {
            builder = builder.metric("rmse", rmse);
        }
        builder.build()
    }

    fn rmse_asc() -> OrderClause {
        OrderClause::parse("metrics.rmse ASC").unwrap()
    }

    fn ids(runs: &[RunRecord]) -> Vec<&str> {
        runs.iter().map(RunRecord::run_id).collect()
    }

    #[test]
    fn test_rank_ascending_metric() {
        let runs = vec![run("a", 0, Some(3.0)), run("b", 1, Some(1.0)), run("c", 2, Some(2.0))];
        let ranked = rank_runs(runs, &[rmse_asc()], Some(2));
        assert_eq!(ids(&ranked), vec!["b", "c"]);
    }

    #[test]
    fn test_rank_missing_metric_last_in_both_directions() {
        let runs = vec![run("a", 0, None), run("b", 1, Some(1.0)), run("c", 2, Some(2.0))];
        let asc = rank_runs(runs.clone(), &[rmse_asc()], None);
        assert_eq!(ids(&asc), vec!["b", "c", "a"]);

        let desc = OrderClause::parse("metrics.rmse DESC").unwrap();
        let ranked = rank_runs(runs, &[desc], None);
        assert_eq!(ids(&ranked), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_rank_ties_prefer_latest_start() {
        let runs = vec![run("a", 0, Some(1.0)), run("b", 5, Some(1.0)), run("c", 3, Some(1.0))];
        let ranked = rank_runs(runs, &[rmse_asc()], Some(1));
        assert_eq!(ids(&ranked), vec!["b"]);
    }

    #[test]
    fn test_rank_zero_limit_is_empty() {
        let runs = vec![run("a", 0, Some(1.0))];
        assert!(rank_runs(runs, &[], Some(0)).is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: top-K equals the first K of a full ordering
            #[test]
            fn prop_top_k_is_prefix_of_full_order(
                values in prop::collection::vec(0.0f64..100.0, 1..40),
                k in 1usize..40,
            ) {
                let runs: Vec<RunRecord> = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| run(&format!("run-{i:03}"), (i % 60) as u32, Some(*v)))
                    .collect();
                let clauses = [rmse_asc()];

                let full = rank_runs(runs.clone(), &clauses, None);
                let top = rank_runs(runs, &clauses, Some(k));

                prop_assert_eq!(top.len(), k.min(values.len()));
                prop_assert_eq!(ids(&top), ids(&full)[..top.len()].to_vec());
            }

            /// Property: ascending output is sorted by the metric
            #[test]
            fn prop_ascending_is_sorted(values in prop::collection::vec(-50.0f64..50.0, 1..40)) {
                let runs: Vec<RunRecord> = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| run(&format!("run-{i:03}"), 0, Some(*v)))
                    .collect();
                let ranked = rank_runs(runs, &[rmse_asc()], None);
                for pair in ranked.windows(2) {
                    prop_assert!(pair[0].metric("rmse") <= pair[1].metric("rmse"));
                }
            }
        }
    }
}
