use anyhow::Result;

use crate::core::decoded::DecodedTransaction;
use crate::index::events::{EventSink, IngestEvent};
use crate::schemas::SchemaSpendItem;

/// External address-extraction collaborator: `script -> address or error`.
pub type AddressExtractor = dyn Fn(&[u8]) -> Result<String> + Send + Sync;

/// One side of a value transfer, as produced by decomposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendItem {
    /// An output this transaction produces: spendable until a later input
    /// resolves against it.
    Produced(ProducedOutput),
    /// An input this transaction uses to consume an earlier output.
    Consuming(ConsumingInput),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedOutput {
    pub out_tx_id: i64,
    pub out_index: i64,
    pub is_coinbase: bool,
    pub out_script: Vec<u8>,
    pub address: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumingInput {
    pub spending_tx_id: i64,
    pub spending_tx_hash: String,
    pub prev_tx_hash: String,
    pub prev_out_index: i64,
    pub in_script: Vec<u8>,
}

impl ProducedOutput {
    /// The persisted form, unspent: the input side stays unset until a
    /// matching input resolves.
    pub fn into_record(self, id: i64) -> SchemaSpendItem {
        SchemaSpendItem {
            id,
            out_tx_id: self.out_tx_id,
            out_index: self.out_index,
            is_coinbase: self.is_coinbase,
            out_script: self.out_script,
            address: self.address,
            value: self.value,
            in_tx_id: 0,
            in_script: Vec::new(),
        }
    }
}

/// Decompose one decoded transaction into its spend items: one produced
/// output per output slot, one consuming input per input reference. Pure
/// list construction; the only side channel is the event sink, which
/// records address-extraction failures (the item is still emitted, with an
/// empty address, so unknown script types never block indexing).
pub fn decompose(
    tx: &DecodedTransaction,
    tx_id: i64,
    extract: &AddressExtractor,
    events: &mut EventSink,
) -> Vec<SpendItem> {
    let mut items = Vec::with_capacity(tx.outputs.len() + tx.inputs.len());

    for (idx, out) in tx.outputs.iter().enumerate() {
        let address = match extract(&out.script) {
            Ok(address) => address,
            Err(e) => {
                events.emit(IngestEvent::AddressExtractionFailed {
                    tx_hash: tx.hash.clone(),
                    out_index: idx as i64,
                    reason: e.to_string(),
                });
                String::new()
            }
        };
        items.push(SpendItem::Produced(ProducedOutput {
            out_tx_id: tx_id,
            out_index: idx as i64,
            is_coinbase: tx.is_coinbase,
            out_script: out.script.clone(),
            address,
            value: out.value,
        }));
    }

    if tx.is_coinbase {
        // The synthetic coinbase input has no previous output to consume
        // and never becomes a resolvable reference.
        return items;
    }

    for input in tx.inputs.iter() {
        items.push(SpendItem::Consuming(ConsumingInput {
            spending_tx_id: tx_id,
            spending_tx_hash: tx.hash.clone(),
            prev_tx_hash: input.prev_tx_hash.clone(),
            prev_out_index: input.prev_out_index,
            in_script: input.unlock_script.clone(),
        }));
    }

    items
}
