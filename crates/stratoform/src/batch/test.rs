use pretty_assertions::assert_eq;

use super::*;

#[derive(Clone, Debug, PartialEq)]
struct Descriptor {
    kind: &'static str,
    value: String,
}

fn v4(value: &str) -> Descriptor {
    Descriptor {
        kind: "IPV4",
        value: value.to_owned(),
    }
}

fn size(n: usize) -> BatchSize {
    BatchSize::new(n).unwrap()
}

fn sizes<T>(plan: &BatchPlan<T>) -> Vec<usize> {
    plan.batches().iter().map(Vec::len).collect()
}

#[test]
fn swapping_one_range_is_one_batch() {
    let plan = BatchPlan::diff([v4("1.2.3.0/24")], [v4("5.6.7.0/24")], size(1000));
    assert_eq!(
        vec![vec![
            Operation::Delete(v4("1.2.3.0/24")),
            Operation::Insert(v4("5.6.7.0/24")),
        ]],
        plan.into_batches()
    );
}

#[test]
fn inserts_split_into_bounded_batches() {
    let new = (0..2500).map(|i| v4(&format!("10.{}.{}.0/24", i / 256, i % 256)));
    let plan = BatchPlan::diff([], new, size(1000));
    assert_eq!(vec![1000, 1000, 500], sizes(&plan));
    assert!(plan.operations().all(Operation::is_insert));
}

#[test]
fn identical_sets_yield_one_empty_batch() {
    let set = vec![v4("1.0.0.0/8"), v4("2.0.0.0/8"), v4("3.0.0.0/8")];
    let plan = BatchPlan::diff(set.clone(), set, size(2));
    assert_eq!(vec![0], sizes(&plan));
    assert!(plan.is_empty());

    let plan = BatchPlan::<Descriptor>::diff([], [], size(1));
    assert_eq!(1, plan.len());
    assert!(plan.is_empty());
}

#[test]
fn order_of_the_same_records_does_not_matter() {
    let old = vec![v4("1.0.0.0/8"), v4("2.0.0.0/8")];
    let new = vec![v4("2.0.0.0/8"), v4("1.0.0.0/8")];
    assert!(BatchPlan::diff(old, new, size(10)).is_empty());
}

#[test]
fn deletes_precede_inserts_across_batches() {
    let old = (0..5).map(|i| v4(&format!("10.0.{i}.0/24")));
    let new = (0..5).map(|i| v4(&format!("10.1.{i}.0/24")));
    let plan = BatchPlan::diff(old, new, size(3));
    assert_eq!(vec![3, 3, 3, 1], sizes(&plan));

    let kinds = plan
        .operations()
        .map(|op| if op.is_delete() { 'd' } else { 'i' })
        .collect::<String>();
    assert_eq!("dddddiiiii", kinds);
}

#[test]
fn unchanged_records_produce_no_operations() {
    let old = vec![v4("1.0.0.0/8"), v4("2.0.0.0/8"), v4("3.0.0.0/8")];
    let new = vec![v4("3.0.0.0/8"), v4("4.0.0.0/8"), v4("1.0.0.0/8")];
    let plan = BatchPlan::diff(old, new, size(1000));
    assert_eq!(
        vec![
            Operation::Delete(v4("2.0.0.0/8")),
            Operation::Insert(v4("4.0.0.0/8")),
        ],
        plan.operations().cloned().collect::<Vec<_>>()
    );
}

#[test]
fn duplicates_are_matched_one_by_one() {
    let old = vec![v4("1.0.0.0/8"), v4("1.0.0.0/8"), v4("1.0.0.0/8")];
    let new = vec![v4("1.0.0.0/8")];
    let plan = BatchPlan::diff(old, new, size(1000));
    assert_eq!(
        vec![
            Operation::Delete(v4("1.0.0.0/8")),
            Operation::Delete(v4("1.0.0.0/8")),
        ],
        plan.operations().cloned().collect::<Vec<_>>()
    );

    let plan = BatchPlan::diff(vec![v4("1.0.0.0/8")], vec![v4("1.0.0.0/8"); 2], size(1000));
    assert_eq!(
        vec![Operation::Insert(v4("1.0.0.0/8"))],
        plan.operations().cloned().collect::<Vec<_>>()
    );
}

#[test]
fn exact_multiple_has_no_trailing_empty_batch() {
    let new = (0..2000).map(|i| format!("record-{i}"));
    let plan = BatchPlan::diff(Vec::<String>::new(), new, size(1000));
    assert_eq!(vec![1000, 1000], sizes(&plan));

    let plan = BatchPlan::diff(vec!["a", "b"], vec![], size(1));
    assert_eq!(vec![1, 1], sizes(&plan));
}

#[test]
fn batch_count_is_ceiling_of_total() {
    for total in 1..=25usize {
        for n in 1..=7 {
            let plan = BatchPlan::diff(0..total, std::iter::empty(), size(n));
            assert_eq!(total.div_ceil(n), plan.len(), "total {total}, n {n}");
            assert_eq!(total, plan.operation_count());
            let (last, full) = plan.batches().split_last().unwrap();
            assert!(full.iter().all(|batch| batch.len() == n));
            assert!((1..=n).contains(&last.len()));
        }
    }
}

#[test]
fn batch_size_rejects_non_positive() {
    assert!(matches!(
        BatchSize::new(0),
        Err(Error::InvalidBatchSize { .. })
    ));
    assert!(matches!(
        BatchSize::try_from(-3i64),
        Err(Error::InvalidBatchSize { size: -3 })
    ));
    assert_eq!(1000, BatchSize::try_from(1000i64).unwrap().get());

    #[derive(Debug, serde::Deserialize)]
    struct Settings {
        #[allow(dead_code)]
        batch_size: BatchSize,
    }
    assert!(toml::from_str::<Settings>("batch_size = 0").is_err());
    assert!(toml::from_str::<Settings>("batch_size = -1").is_err());
    assert!(toml::from_str::<Settings>("batch_size = 5").is_ok());
}

#[derive(Debug, snafu::Snafu)]
#[snafu(display("remote rejected batch {index}"))]
struct Rejected {
    index: usize,
}

#[tokio::test]
async fn apply_runs_batches_in_order() {
    let plan = BatchPlan::diff(Vec::<u32>::new(), 0..7, size(3));
    let mut seen = vec![];
    let applied = plan
        .apply(|index, batch| {
            seen.push((index, batch.len()));
            async { Ok::<_, Rejected>(()) }
        })
        .await
        .unwrap();
    assert_eq!(3, applied);
    assert_eq!(vec![(0, 3), (1, 3), (2, 1)], seen);
}

#[tokio::test]
async fn apply_skips_the_empty_batch() {
    let plan = BatchPlan::diff(vec![1, 2], vec![2, 1], size(3));
    let mut calls = 0;
    let applied = plan
        .apply(|_, _| {
            calls += 1;
            async { Ok::<_, Rejected>(()) }
        })
        .await
        .unwrap();
    assert_eq!(1, applied);
    assert_eq!(0, calls);
}

#[tokio::test]
async fn apply_stops_at_the_first_failure() {
    let _ = env_logger::builder().is_test(true).try_init();

    let plan = BatchPlan::diff(Vec::<u32>::new(), 0..9, size(3));
    let mut calls = 0;
    let err = plan
        .apply(|index, _| {
            calls += 1;
            async move {
                if index == 1 {
                    RejectedSnafu { index }.fail()
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap_err();
    assert_eq!(2, calls);
    assert_eq!(1, err.applied);
    assert_eq!(3, err.total);
    assert_eq!("applied 1 of 3 batches: remote rejected batch 1", err.to_string());
}
