use crate::error::StoreError;
use crate::index::balances;
use crate::index::decompose::ConsumingInput;
use crate::index::events::{EventSink, IngestEvent, SkipReason};
use crate::index::storage::{self, IndexTable};
use crate::runtime::store::StoreTxn;

/// Result of resolving one consuming input. Skips are policy, not errors:
/// they are recorded and ingestion of the block continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The referenced output was found unspent and transitioned to spent;
    /// its owner's balance was debited by `value`.
    Spent { address: String, value: i64 },
    Skipped(SkipReason),
}

/// Resolve a consuming input against the store: locate the produced output
/// it consumes, link the two, and debit the owning address.
///
/// Inputs are resolved strictly after all of their block's outputs are
/// persisted, so intra-block spends find their output in the same
/// transaction overlay. The balance is mutated only inside the
/// exactly-one-match arm, after the match is verified.
pub fn resolve_input(
    table: &IndexTable,
    txn: &mut StoreTxn,
    input: &ConsumingInput,
    events: &mut EventSink,
) -> Result<ResolveOutcome, StoreError> {
    let Some(prev_tx) = storage::tx_by_hash(table, txn, &input.prev_tx_hash)? else {
        return Ok(skip(
            events,
            input,
            SkipReason::UnknownPreviousTransaction { prev_tx_hash: input.prev_tx_hash.clone() },
        ));
    };

    let mut matches =
        storage::spend_items_by_outpoint(table, txn, prev_tx.id, input.prev_out_index)?;
    match matches.len() {
        1 => {
            let mut item = matches.remove(0);
            if item.is_spent() {
                return Ok(skip(
                    events,
                    input,
                    SkipReason::AlreadySpent {
                        prev_tx_id: prev_tx.id,
                        prev_out_index: input.prev_out_index,
                    },
                ));
            }
            item.in_tx_id = input.spending_tx_id;
            item.in_script = input.in_script.clone();
            storage::update_spend_item(table, txn, &item)?;
            if !item.address.is_empty() {
                balances::apply_delta(table, txn, &item.address, -item.value, events)?;
            }
            Ok(ResolveOutcome::Spent { address: item.address, value: item.value })
        }
        0 => Ok(skip(
            events,
            input,
            SkipReason::DanglingInput {
                prev_tx_id: prev_tx.id,
                prev_out_index: input.prev_out_index,
            },
        )),
        // The outpoint key admits at most one row, so this arm is only
        // reachable if the uniqueness invariant was violated upstream.
        _ => Ok(skip(
            events,
            input,
            SkipReason::AmbiguousPreviousOutput {
                prev_tx_id: prev_tx.id,
                prev_out_index: input.prev_out_index,
            },
        )),
    }
}

fn skip(events: &mut EventSink, input: &ConsumingInput, reason: SkipReason) -> ResolveOutcome {
    events.emit(IngestEvent::InputSkipped {
        tx_hash: input.spending_tx_hash.clone(),
        reason: reason.clone(),
    });
    ResolveOutcome::Skipped(reason)
}
