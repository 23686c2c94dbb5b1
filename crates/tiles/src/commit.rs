use crate::{PendingDab, PendingQueue, TileKey, TileResource, TileStore};

/// Result of rasterizing one tile of a flush batch.
///
/// `dabs` travels with the result so a failed tile can be re-queued untouched.
#[derive(Debug)]
pub struct TileOutcome<T, E> {
    pub key: TileKey,
    pub dabs: Vec<PendingDab>,
    pub result: Result<T, E>,
}

#[derive(Debug)]
pub struct TileFailure<E> {
    pub key: TileKey,
    pub error: E,
}

#[derive(Debug)]
pub struct CommitReport<E> {
    pub committed: Vec<TileKey>,
    pub failed: Vec<TileFailure<E>>,
    /// Tiles dropped because the store was cleared while the batch was in flight.
    pub discarded: usize,
}

impl<E> Default for CommitReport<E> {
    fn default() -> Self {
        Self {
            committed: Vec::new(),
            failed: Vec::new(),
            discarded: 0,
        }
    }
}

impl<E> CommitReport<E> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies a flush batch to the store.
///
/// Successful tiles replace their store entry. Failed tiles go back to the
/// front of their queue entry and leave the store untouched. When the store
/// generation moved past `batch_generation`, nothing is applied and every
/// produced image is released.
pub fn commit_outcomes<T, E>(
    store: &mut TileStore<T>,
    queue: &mut PendingQueue,
    batch_generation: u64,
    outcomes: Vec<TileOutcome<T, E>>,
) -> CommitReport<E>
where
    T: TileResource,
{
    let mut report = CommitReport::default();
    if store.generation() != batch_generation {
        tracing::warn!(
            batch_generation,
            store_generation = store.generation(),
            tiles = outcomes.len(),
            "discarding flush results for a cleared tile store"
        );
        for outcome in outcomes {
            if let Ok(image) = outcome.result {
                image.release();
            }
            report.discarded += 1;
        }
        return report;
    }

    for outcome in outcomes {
        match outcome.result {
            Ok(image) => {
                store.replace(outcome.key, image);
                report.committed.push(outcome.key);
            }
            Err(error) => {
                queue.restore(outcome.key, outcome.dabs);
                report.failed.push(TileFailure {
                    key: outcome.key,
                    error,
                });
            }
        }
    }
    report
}
