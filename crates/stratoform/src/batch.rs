//! Bounded batch diffing.
//!
//! Some provisioning APIs (WAF IP sets being the motivating case) accept a
//! list of insert/delete mutations per call, but cap how many mutations a
//! single call may carry. [`BatchPlan::diff`] computes the operations that
//! turn an old set of records into a new one and splits them into batches of
//! at most [`BatchSize`] operations.
//!
//! The plan is pure data. Submitting it is done with [`BatchPlan::apply`],
//! which drives a caller supplied executor one batch at a time.
use std::{future::Future, num::NonZeroUsize};

use snafu::prelude::*;

use crate::{Error, InvalidBatchSizeSnafu};

/// Upper bound on the number of operations in one batch.
///
/// Always positive. Zero and negative sizes are rejected when the value is
/// constructed, including when it is deserialized from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct BatchSize(NonZeroUsize);

impl BatchSize {
    pub const MIN: BatchSize = BatchSize(NonZeroUsize::MIN);

    pub fn new(size: usize) -> Result<Self, Error> {
        let size = NonZeroUsize::new(size).context(InvalidBatchSizeSnafu { size: 0i64 })?;
        Ok(Self(size))
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl TryFrom<i64> for BatchSize {
    type Error = Error;

    fn try_from(size: i64) -> Result<Self, Self::Error> {
        let size = usize::try_from(size)
            .ok()
            .and_then(NonZeroUsize::new)
            .context(InvalidBatchSizeSnafu { size })?;
        Ok(Self(size))
    }
}

impl From<BatchSize> for i64 {
    fn from(size: BatchSize) -> Self {
        i64::try_from(size.get()).unwrap_or(i64::MAX)
    }
}

impl core::fmt::Display for BatchSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One unit of change against a remote set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Operation<T> {
    Delete(T),
    Insert(T),
}

impl<T> Operation<T> {
    /// The record this operation acts on.
    pub fn record(&self) -> &T {
        match self {
            Operation::Delete(record) | Operation::Insert(record) => record,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete(_))
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Operation::Insert(_))
    }
}

/// Returned by [`BatchPlan::apply`] when a batch fails.
///
/// Batches before the failing one stay applied.
#[derive(Debug, snafu::Snafu)]
#[snafu(display("applied {applied} of {total} batches: {source}"))]
pub struct PartialApplyError<E>
where
    E: std::error::Error + 'static,
{
    /// Number of batches that were applied before the failure.
    pub applied: usize,
    /// Number of batches in the plan.
    pub total: usize,
    pub source: E,
}

/// Accumulates operations, closing the running batch once it is full.
struct Batcher<T> {
    size: usize,
    current: Vec<Operation<T>>,
    done: Vec<Vec<Operation<T>>>,
}

impl<T> Batcher<T> {
    fn new(size: BatchSize) -> Self {
        Self {
            size: size.get(),
            current: Vec::new(),
            done: Vec::new(),
        }
    }

    fn push(&mut self, op: Operation<T>) {
        if self.current.len() == self.size {
            let full = std::mem::take(&mut self.current);
            self.done.push(full);
        }
        self.current.push(op);
    }

    fn finish(mut self) -> Vec<Vec<Operation<T>>> {
        self.done.push(self.current);
        self.done
    }
}

/// An ordered sequence of bounded batches.
///
/// Concatenating the batches in order yields every delete followed by every
/// insert. A plan always holds at least one batch; the only empty batch a
/// plan can hold is the single batch of a plan with no operations.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchPlan<T> {
    batches: Vec<Vec<Operation<T>>>,
}

impl<T: PartialEq> BatchPlan<T> {
    /// Computes the operations that transform `old` into `new`, split into
    /// batches of at most `size` operations.
    ///
    /// Records are matched by equality. Each record of `old` consumes the
    /// first equal record still unmatched in `new`, so duplicates are paired
    /// off one by one rather than collapsed.
    pub fn diff(
        old: impl IntoIterator<Item = T>,
        new: impl IntoIterator<Item = T>,
        size: BatchSize,
    ) -> Self {
        let mut remaining: Vec<T> = new.into_iter().collect();
        let mut batcher = Batcher::new(size);

        for record in old {
            match remaining.iter().position(|candidate| *candidate == record) {
                Some(index) => {
                    remaining.remove(index);
                }
                None => batcher.push(Operation::Delete(record)),
            }
        }

        for record in remaining {
            batcher.push(Operation::Insert(record));
        }

        Self {
            batches: batcher.finish(),
        }
    }
}

impl<T> BatchPlan<T> {
    pub fn batches(&self) -> &[Vec<Operation<T>>] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<Vec<Operation<T>>> {
        self.batches
    }

    /// Number of batches, including a trailing empty one.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Whether the plan carries no operations at all.
    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(Vec::is_empty)
    }

    /// Total number of operations across all batches.
    pub fn operation_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// All operations, in submission order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation<T>> {
        self.batches.iter().flatten()
    }

    /// Submits the batches one at a time with `execute`, awaiting each
    /// before the next.
    ///
    /// Empty batches are skipped but still counted as applied. Returns the
    /// number of batches applied, which is always [`BatchPlan::len`] on
    /// success.
    pub async fn apply<'a, F, Fut, E>(&'a self, mut execute: F) -> Result<usize, PartialApplyError<E>>
    where
        F: FnMut(usize, &'a [Operation<T>]) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::error::Error + 'static,
    {
        let total = self.batches.len();
        for (index, batch) in self.batches.iter().enumerate() {
            if batch.is_empty() {
                log::trace!("skipping empty batch {}/{total}", index + 1);
                continue;
            }
            log::debug!(
                "applying batch {}/{total} with {} operations",
                index + 1,
                batch.len()
            );
            if let Err(source) = execute(index, batch.as_slice()).await {
                log::error!("batch {}/{total} failed, {index} applied", index + 1);
                return Err(PartialApplyError {
                    applied: index,
                    total,
                    source,
                });
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod test;
