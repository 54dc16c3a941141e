//! Properties of a single poll tick over arbitrary item sets and job snapshots

use jobwatch::build::{reconcile_tick, ItemStatus, TrackedItem};
use jobwatch::transport::{Job, JobResult, JobState, ResultStatus};
use proptest::prelude::*;
use std::collections::HashSet;

const RESULT_STATUSES: [&str; 4] = ["success", "empty_file", "error", "partial"];

fn item_strategy() -> impl Strategy<Value = Vec<TrackedItem>> {
    prop::collection::vec(0u8..5, 0..8).prop_map(|states| {
        states
            .into_iter()
            .enumerate()
            .map(|(i, state)| {
                let mut item = TrackedItem::new(format!("f{}", i));
                match state {
                    0 => {}
                    1 => item.promote(),
                    2 => item.finish(ItemStatus::Completed, None),
                    3 => item.finish(ItemStatus::Error, Some("earlier".to_string())),
                    _ => item.finish(ItemStatus::Empty, None),
                }
                item
            })
            .collect()
    })
}

fn job_strategy() -> impl Strategy<Value = Job> {
    (
        any::<bool>(),
        prop::collection::vec((0usize..10, 0usize..RESULT_STATUSES.len()), 0..12),
    )
        .prop_map(|(completed, results)| Job {
            job_id: None,
            status: if completed {
                JobState::Completed
            } else {
                JobState::Running
            },
            processed: results.len() as u64,
            total: 10,
            results: results
                .into_iter()
                .map(|(file, status)| JobResult {
                    source: format!("f{}", file),
                    status: ResultStatus::from(RESULT_STATUSES[status].to_string()),
                    message: None,
                })
                .collect(),
        })
}

fn expected_terminal(status: &ResultStatus) -> ItemStatus {
    match status {
        ResultStatus::Success => ItemStatus::Completed,
        ResultStatus::EmptyFile => ItemStatus::Empty,
        ResultStatus::Other(_) => ItemStatus::Error,
    }
}

/// A completed job leaves nothing waiting or processing.
#[test]
fn test_completion_leaves_no_unfinished_items() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(item_strategy(), job_strategy()), |(mut items, mut job)| {
            job.status = JobState::Completed;
            let outcome = reconcile_tick(&mut items, &job);

            prop_assert!(outcome.completed);
            for item in &items {
                prop_assert!(item.status.is_terminal(), "{:?} left unfinished", item);
                prop_assert_eq!(item.progress, 100);
            }
            Ok(())
        })
        .unwrap();
}

/// At most one item is promoted per tick, and exactly one while an item without a
/// result is still waiting.
#[test]
fn test_single_promotion_per_tick() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(item_strategy(), job_strategy()), |(mut items, mut job)| {
            job.status = JobState::Running;
            let before = items.clone();
            let covered: HashSet<&str> = job.results.iter().map(|r| r.source.as_str()).collect();
            let outcome = reconcile_tick(&mut items, &job);

            let promoted: Vec<&TrackedItem> = before
                .iter()
                .zip(&items)
                .filter(|(b, a)| b.status == ItemStatus::Waiting && a.status == ItemStatus::Processing)
                .map(|(_, a)| a)
                .collect();
            prop_assert!(promoted.len() <= 1);

            let uncovered_waiting = before
                .iter()
                .any(|i| i.status == ItemStatus::Waiting && !covered.contains(i.path.as_str()));
            prop_assert_eq!(promoted.len() == 1, uncovered_waiting);
            prop_assert_eq!(outcome.promoted.is_some(), uncovered_waiting);
            for item in promoted {
                prop_assert_eq!(item.progress, 50);
            }
            Ok(())
        })
        .unwrap();
}

/// Items that were already terminal are never rewritten.
#[test]
fn test_terminal_items_are_stable() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(item_strategy(), job_strategy()), |(mut items, job)| {
            let before = items.clone();
            reconcile_tick(&mut items, &job);

            for (b, a) in before.iter().zip(&items) {
                if b.status.is_terminal() {
                    prop_assert_eq!(b, a);
                }
            }
            Ok(())
        })
        .unwrap();
}

/// Every non-terminal item ends as the mapping of its first backend result, or as an
/// error when the completed job has none for it.
#[test]
fn test_final_statuses_refine_backend_results() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(item_strategy(), job_strategy()), |(mut items, mut job)| {
            job.status = JobState::Completed;
            let before = items.clone();
            reconcile_tick(&mut items, &job);

            for (b, a) in before.iter().zip(&items) {
                if b.status.is_terminal() {
                    continue;
                }
                let first = job.results.iter().find(|r| r.source == b.path);
                let expected = first
                    .map(|r| expected_terminal(&r.status))
                    .unwrap_or(ItemStatus::Error);
                prop_assert_eq!(a.status, expected);
            }
            Ok(())
        })
        .unwrap();
}
