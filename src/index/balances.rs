use crate::error::StoreError;
use crate::index::events::{EventSink, IngestEvent};
use crate::index::storage::{self, IndexTable};
use crate::runtime::store::StoreTxn;
use crate::schemas::SchemaBalance;

/// Balance Ledger.
///
/// Owns the invariant `balance(address) == sum of values of unspent
/// outputs owned by address`. Mutation happens exclusively through
/// [`apply_delta`], inside the same store transaction as the spend-item
/// transition it accompanies.

/// Fetch the balance row for `address`, creating it with balance 0 on
/// first touch. The creation is a staged write committed with the block,
/// and the address-keyed row makes a duplicate impossible.
pub fn get_or_create(
    table: &IndexTable,
    txn: &mut StoreTxn,
    address: &str,
) -> Result<SchemaBalance, StoreError> {
    if let Some(balance) = storage::balance_by_address(table, txn, address)? {
        return Ok(balance);
    }
    let balance = SchemaBalance { id: txn.next_id("balance")?, address: address.to_string(), balance: 0 };
    txn.insert(&table.balance_key(address), storage::encode_record(&balance)?, "balance address")?;
    Ok(balance)
}

/// Read-modify-write of the running balance. No clamping: a negative
/// result indicates an index inconsistency and is surfaced as an event
/// rather than hidden.
pub fn apply_delta(
    table: &IndexTable,
    txn: &mut StoreTxn,
    address: &str,
    delta: i64,
    events: &mut EventSink,
) -> Result<i64, StoreError> {
    let mut record = get_or_create(table, txn, address)?;
    record.balance += delta;
    txn.update(&table.balance_key(address), storage::encode_record(&record)?, "balance address")?;
    if record.balance < 0 {
        events.emit(IngestEvent::NegativeBalance {
            address: address.to_string(),
            balance: record.balance,
        });
    }
    Ok(record.balance)
}
