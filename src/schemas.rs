use borsh::{BorshDeserialize, BorshSerialize};

/// Persisted block record, keyed by block hash. `next_hash` is the one
/// field mutated after creation: it is set on the predecessor when its
/// successor is ingested.
#[derive(BorshSerialize, BorshDeserialize, PartialEq, Debug, Clone)]
pub struct SchemaBlock {
    pub id: i64,
    pub height: i64,
    pub hash: String,
    pub prev_hash: String,
    pub next_hash: String,
    pub merkle_root: String,
    pub time: i64,
    pub ver: u32,
    pub nonce: u32,
    pub bits: u32,
    pub confirmed: bool,
}

/// Persisted transaction record, keyed by transaction hash.
#[derive(BorshSerialize, BorshDeserialize, PartialEq, Debug, Clone)]
pub struct SchemaTx {
    pub id: i64,
    pub hash: String,
    pub is_coinbase: bool,
}

/// Explicit block <-> transaction link record, keyed by (block_id, tx_id).
#[derive(BorshSerialize, BorshDeserialize, PartialEq, Debug, Clone, Copy)]
pub struct SchemaBlockTx {
    pub id: i64,
    pub block_id: i64,
    pub tx_id: i64,
}

/// Produced-output spend item, keyed by (out_tx_id, out_index). The key
/// enforces outpoint uniqueness. `in_tx_id == 0` means unspent; the
/// unspent -> spent transition sets `in_tx_id`/`in_script` exactly once.
#[derive(BorshSerialize, BorshDeserialize, PartialEq, Debug, Clone)]
pub struct SchemaSpendItem {
    pub id: i64,
    pub out_tx_id: i64,
    pub out_index: i64,
    pub is_coinbase: bool,
    pub out_script: Vec<u8>,
    pub address: String,
    pub value: i64,
    pub in_tx_id: i64,
    pub in_script: Vec<u8>,
}

impl SchemaSpendItem {
    #[inline]
    pub fn is_spent(&self) -> bool {
        self.in_tx_id != 0
    }
}

/// Running per-address balance, keyed by address. Created lazily with
/// balance 0 on first touch.
#[derive(BorshSerialize, BorshDeserialize, PartialEq, Debug, Clone)]
pub struct SchemaBalance {
    pub id: i64,
    pub address: String,
    pub balance: i64,
}
