//! Notifications about committed chain changes.
//!
//! The execution stage records account changes in the [`Accumulator`] while a cycle runs. Once
//! the cycle's transaction is committed the stage loop flushes the accumulator to a
//! [`StateChangeConsumer`] and announces the new canonical headers through [`Events`].

mod accumulator;
mod events;

pub use accumulator::{
    AccountChange, Accumulator, Action, Direction, StateChange, StateChangeBatch,
    StateChangeConsumer,
};
pub use events::{
    Events, HeaderSubscription, PendingBlockSubscription, StateChangeSubscription, Subscription,
};

use stageloop_db::{ChainReader, DatabaseError, DbTx};
use stageloop_primitives::BlockNumber;
use tracing::debug;

/// Publishes the canonical headers that became final in the last cycle.
///
/// The range starts after the finish stage progress before the cycle, or after the unwind point
/// if the cycle unwound below it, and ends at `head`. At most the last `limit` headers are
/// published. Returns the number of published headers.
pub fn notify_new_headers<TX: DbTx>(
    tx: &TX,
    finish_before: BlockNumber,
    head: BlockNumber,
    unwind_point: Option<BlockNumber>,
    limit: u64,
    events: &Events,
) -> Result<usize, DatabaseError> {
    let after = unwind_point.filter(|point| *point < finish_before).unwrap_or(finish_before);
    let from = (after + 1).max(head.saturating_sub(limit.max(1)) + 1);
    if from > head {
        return Ok(0)
    }

    let mut headers = Vec::with_capacity((head - from + 1) as usize);
    for number in from..=head {
        if let Some(header) = tx.canonical_header(number)? {
            headers.push(header);
        }
    }

    let count = headers.len();
    if count > 0 {
        debug!(target: "sync::notifications", from, to = head, count, "Announcing new headers");
        events.publish_headers(headers);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageloop_db::{tables, Database, DbTxMut, MemoryDatabase};
    use stageloop_primitives::test_utils::{random_header_range, rng};
    use stageloop_primitives::B256;

    fn db_with_headers(count: u64) -> MemoryDatabase {
        let db = MemoryDatabase::new();
        let headers = random_header_range(&mut rng(), 0..count, B256::ZERO);
        db.update(|tx| {
            for header in headers {
                tx.put::<tables::CanonicalHeaders>(header.number, header.hash())?;
                tx.put::<tables::Headers>(header.hash(), header.unseal())?;
            }
            Ok::<_, DatabaseError>(())
        })
        .unwrap()
        .unwrap();
        db
    }

    #[test]
    fn publishes_headers_after_previous_finish() {
        let db = db_with_headers(11);
        let events = Events::default();
        let mut subscription = events.subscribe_headers();
        let tx = db.tx().unwrap();

        assert_eq!(notify_new_headers(&tx, 4, 10, None, 1024, &events).unwrap(), 6);
        let headers = subscription.try_recv().unwrap();
        assert_eq!(headers.first().unwrap().number, 5);
        assert_eq!(headers.last().unwrap().number, 10);
    }

    #[test]
    fn unwind_point_extends_the_range() {
        let db = db_with_headers(11);
        let events = Events::default();
        let mut subscription = events.subscribe_headers();
        let tx = db.tx().unwrap();

        assert_eq!(notify_new_headers(&tx, 8, 10, Some(2), 1024, &events).unwrap(), 8);
        assert_eq!(subscription.try_recv().unwrap()[0].number, 3);

        // an unwind point above the previous progress changes nothing
        assert_eq!(notify_new_headers(&tx, 8, 10, Some(9), 1024, &events).unwrap(), 2);
    }

    #[test]
    fn range_is_capped_and_empty_when_nothing_moved() {
        let db = db_with_headers(11);
        let events = Events::default();
        let mut subscription = events.subscribe_headers();
        let tx = db.tx().unwrap();

        assert_eq!(notify_new_headers(&tx, 0, 10, None, 3, &events).unwrap(), 3);
        assert_eq!(subscription.try_recv().unwrap()[0].number, 8);

        assert_eq!(notify_new_headers(&tx, 10, 10, None, 1024, &events).unwrap(), 0);
        assert!(subscription.try_recv().is_err());
    }
}
