use std::sync::Arc;

use anyhow::Result;
use bitcoin::Network;

use crate::core::decoded::{DecodedBlock, DecodedTransaction};
use crate::error::{IngestError, StoreError};
use crate::index::addresses::extract_address;
use crate::index::balances;
use crate::index::decompose::{self, ConsumingInput, SpendItem};
use crate::index::events::{EventSink, IngestEvent};
use crate::index::resolve::{self, ResolveOutcome};
use crate::index::storage::{self, IndexTable};
use crate::runtime::store::{RecordStore, StoreTxn};
use crate::schemas::{SchemaBlock, SchemaTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Indexed,
    /// A block with this hash is already committed; nothing was written.
    AlreadyIndexed,
}

/// Per-block ingestion summary, including every event recorded while the
/// block was processed, so callers can assert on skip reasons.
#[derive(Debug)]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    pub height: i64,
    pub hash: String,
    pub outputs_indexed: usize,
    pub inputs_resolved: usize,
    pub inputs_skipped: usize,
    pub events: Vec<IngestEvent>,
}

/// Explicitly constructed ingestion context: the store handle, the address
/// extractor, and the structured event sink. No process-wide state.
pub struct Ingestor {
    store: RecordStore,
    table: IndexTable,
    extract: Arc<dyn Fn(&[u8]) -> Result<String> + Send + Sync>,
    events: EventSink,
}

impl Ingestor {
    /// Context with the default script-to-address collaborator for `network`.
    pub fn new(store: RecordStore, network: Network) -> Self {
        Self::with_extractor(store, Arc::new(move |script| extract_address(script, network)))
    }

    pub fn with_extractor(
        store: RecordStore,
        extract: Arc<dyn Fn(&[u8]) -> Result<String> + Send + Sync>,
    ) -> Self {
        Self { store, table: IndexTable::new(), extract, events: EventSink::new() }
    }

    /// Silence operator lines; events are still recorded in each report.
    pub fn silence(mut self) -> Self {
        self.events = EventSink::quiet();
        self
    }

    #[inline]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    #[inline]
    pub fn table(&self) -> &IndexTable {
        &self.table
    }

    /// Height of the highest committed block, if any.
    pub fn index_height(&self) -> Result<Option<i64>, StoreError> {
        let txn = self.store.begin();
        storage::load_index_height(&self.table, &txn)
    }

    /// Ingest one block as a single atomic unit of work.
    ///
    /// Ordering inside the unit: block record, predecessor link, every
    /// transaction record, then every produced output of the whole block,
    /// then every consuming input in transaction order. Any persistence
    /// failure abandons the transaction and the store is left untouched;
    /// per-input resolution failures only produce skip events.
    pub fn ingest_block(&mut self, block: &DecodedBlock) -> Result<IngestReport, IngestError> {
        // Events of a previously aborted block must not surface in this
        // block's report.
        self.events.drain();

        block.validate()?;

        let mut txn = self.store.begin();

        if storage::block_by_hash(&self.table, &txn, &block.hash)?.is_some() {
            self.events.emit(IngestEvent::BlockAlreadyIndexed {
                height: block.height,
                hash: block.hash.clone(),
            });
            txn.rollback();
            return Ok(IngestReport {
                outcome: IngestOutcome::AlreadyIndexed,
                height: block.height,
                hash: block.hash.clone(),
                outputs_indexed: 0,
                inputs_resolved: 0,
                inputs_skipped: 0,
                events: self.events.drain(),
            });
        }

        if let Some(done) = storage::load_index_height(&self.table, &txn)? {
            if block.height <= done {
                return Err(IngestError::OutOfOrder { got: block.height, expected: done + 1 });
            }
        }

        let block_record = SchemaBlock {
            id: txn.next_id("block")?,
            height: block.height,
            hash: block.hash.clone(),
            prev_hash: block.prev_hash.clone(),
            next_hash: block.next_hash.clone(),
            merkle_root: block.merkle_root.clone(),
            time: block.time,
            ver: block.version,
            nonce: block.nonce,
            bits: block.bits,
            confirmed: true,
        };
        storage::insert_block(&self.table, &mut txn, &block_record)?;
        self.link_predecessor(&mut txn, block)?;

        // Persist every transaction before decomposing anything, so
        // intra-block references resolve against assigned ids.
        let mut tx_ids = Vec::with_capacity(block.transactions.len());
        for tx in block.transactions.iter() {
            let tx_id = self.persist_transaction(&mut txn, block_record.id, tx)?;
            tx_ids.push(tx_id);
        }

        // All of the block's own outputs must be durable in the overlay
        // before any input resolution starts.
        let mut outputs_indexed = 0usize;
        let mut pending_inputs: Vec<ConsumingInput> = Vec::new();
        for (tx, tx_id) in block.transactions.iter().zip(tx_ids.iter()) {
            for item in decompose::decompose(tx, *tx_id, &*self.extract, &mut self.events) {
                match item {
                    SpendItem::Produced(out) => {
                        let address = out.address.clone();
                        let value = out.value;
                        let record = out.into_record(txn.next_id("spenditem")?);
                        storage::insert_spend_item(&self.table, &mut txn, &record)?;
                        if !address.is_empty() {
                            balances::apply_delta(
                                &self.table,
                                &mut txn,
                                &address,
                                value,
                                &mut self.events,
                            )?;
                        }
                        outputs_indexed += 1;
                    }
                    SpendItem::Consuming(input) => pending_inputs.push(input),
                }
            }
        }

        let mut inputs_resolved = 0usize;
        let mut inputs_skipped = 0usize;
        for input in pending_inputs.iter() {
            match resolve::resolve_input(&self.table, &mut txn, input, &mut self.events)? {
                ResolveOutcome::Spent { .. } => inputs_resolved += 1,
                ResolveOutcome::Skipped(_) => inputs_skipped += 1,
            }
        }

        storage::persist_index_height(&self.table, &mut txn, block.height);
        txn.commit()?;

        self.events.emit(IngestEvent::BlockIndexed {
            height: block.height,
            hash: block.hash.clone(),
            outputs: outputs_indexed,
            spends: inputs_resolved,
            skips: inputs_skipped,
        });

        Ok(IngestReport {
            outcome: IngestOutcome::Indexed,
            height: block.height,
            hash: block.hash.clone(),
            outputs_indexed,
            inputs_resolved,
            inputs_skipped,
            events: self.events.drain(),
        })
    }

    /// Set `next_hash` on the predecessor block, the one field with an
    /// update-after-create requirement.
    fn link_predecessor(
        &mut self,
        txn: &mut StoreTxn,
        block: &DecodedBlock,
    ) -> Result<(), StoreError> {
        if block.prev_hash.is_empty() {
            return Ok(());
        }
        let Some(mut prev) = storage::block_by_hash(&self.table, txn, &block.prev_hash)? else {
            // Predecessor not indexed; tolerated during backfill.
            return Ok(());
        };
        if prev.next_hash.is_empty() {
            prev.next_hash = block.hash.clone();
            storage::update_block(&self.table, txn, &prev)?;
        }
        Ok(())
    }

    /// Persist a transaction record, reusing the existing row when the
    /// hash is already known (the same transaction may be referenced from
    /// several contexts during backfill).
    fn persist_transaction(
        &mut self,
        txn: &mut StoreTxn,
        block_id: i64,
        tx: &DecodedTransaction,
    ) -> Result<i64, StoreError> {
        let tx_id = match storage::tx_by_hash(&self.table, txn, &tx.hash)? {
            Some(existing) => existing.id,
            None => {
                let record =
                    SchemaTx { id: txn.next_id("tx")?, hash: tx.hash.clone(), is_coinbase: tx.is_coinbase };
                storage::insert_tx(&self.table, txn, &record)?;
                record.id
            }
        };
        storage::link_block_tx(&self.table, txn, block_id, tx_id)?;
        Ok(tx_id)
    }
}
