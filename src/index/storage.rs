use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::StoreError;
use crate::runtime::store::StoreTxn;
use crate::schemas::{SchemaBalance, SchemaBlock, SchemaBlockTx, SchemaSpendItem, SchemaTx};

/// Relative key under the index namespace, composed left to right.
#[derive(Clone)]
pub struct KeyPath {
    key: Vec<u8>,
}

impl KeyPath {
    pub fn root() -> Self {
        Self { key: Vec::new() }
    }

    pub fn keyword(&self, suffix: &str) -> Self {
        self.select(suffix.as_bytes())
    }

    pub fn select(&self, suffix: &[u8]) -> Self {
        let mut key = self.key.clone();
        key.extend_from_slice(suffix);
        Self { key }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn into_key(self) -> Vec<u8> {
        self.key
    }
}

/// Key layout of the whole index. One row family per record kind, plus the
/// secondary rows the queries need: height -> hash, id -> hash, and the
/// per-address outpoint markers that make balances replayable.
#[allow(non_snake_case)]
#[derive(Clone)]
pub struct IndexTable {
    pub INDEX_HEIGHT: KeyPath,
    pub BLOCK_BY_HASH: KeyPath,
    pub BLOCK_HASH_BY_HEIGHT: KeyPath,
    pub TX_BY_HASH: KeyPath,
    pub TX_HASH_BY_ID: KeyPath,
    pub BLOCK_TX: KeyPath,
    pub SPEND_ITEM_BY_OUTPOINT: KeyPath,
    pub SPEND_ITEM_ADDR: KeyPath,
    pub BALANCE_BY_ADDRESS: KeyPath,
}

impl IndexTable {
    pub fn new() -> Self {
        let root = KeyPath::root();
        IndexTable {
            INDEX_HEIGHT: root.keyword("/index_height"),
            BLOCK_BY_HASH: root.keyword("/blocks/hash/"),
            BLOCK_HASH_BY_HEIGHT: root.keyword("/blocks/height/"),
            TX_BY_HASH: root.keyword("/txs/hash/"),
            TX_HASH_BY_ID: root.keyword("/txs/id/"),
            BLOCK_TX: root.keyword("/block_txs/"),
            SPEND_ITEM_BY_OUTPOINT: root.keyword("/spenditems/out/"),
            SPEND_ITEM_ADDR: root.keyword("/spenditems/addr/"),
            BALANCE_BY_ADDRESS: root.keyword("/balances/"),
        }
    }

    pub fn block_key(&self, hash: &str) -> Vec<u8> {
        self.BLOCK_BY_HASH.select(hash.as_bytes()).into_key()
    }

    pub fn block_height_key(&self, height: i64) -> Vec<u8> {
        // Heights are validated non-negative, so BE bytes sort correctly.
        self.BLOCK_HASH_BY_HEIGHT.select(&height.to_be_bytes()).into_key()
    }

    pub fn tx_key(&self, hash: &str) -> Vec<u8> {
        self.TX_BY_HASH.select(hash.as_bytes()).into_key()
    }

    pub fn tx_id_key(&self, tx_id: i64) -> Vec<u8> {
        self.TX_HASH_BY_ID.select(&tx_id.to_be_bytes()).into_key()
    }

    pub fn block_tx_key(&self, block_id: i64, tx_id: i64) -> Vec<u8> {
        let mut suffix = Vec::with_capacity(16);
        suffix.extend_from_slice(&block_id.to_be_bytes());
        suffix.extend_from_slice(&tx_id.to_be_bytes());
        self.BLOCK_TX.select(&suffix).into_key()
    }

    pub fn outpoint_key(&self, out_tx_id: i64, out_index: i64) -> Vec<u8> {
        let mut suffix = Vec::with_capacity(16);
        suffix.extend_from_slice(&out_tx_id.to_be_bytes());
        suffix.extend_from_slice(&out_index.to_be_bytes());
        self.SPEND_ITEM_BY_OUTPOINT.select(&suffix).into_key()
    }

    pub fn spend_item_addr_key(&self, address: &str, out_tx_id: i64, out_index: i64) -> Vec<u8> {
        let mut suffix = Vec::with_capacity(address.len() + 1 + 16);
        suffix.extend_from_slice(address.as_bytes());
        suffix.push(b'/');
        suffix.extend_from_slice(&out_tx_id.to_be_bytes());
        suffix.extend_from_slice(&out_index.to_be_bytes());
        self.SPEND_ITEM_ADDR.select(&suffix).into_key()
    }

    pub fn spend_item_addr_prefix(&self, address: &str) -> Vec<u8> {
        let mut suffix = Vec::with_capacity(address.len() + 1);
        suffix.extend_from_slice(address.as_bytes());
        suffix.push(b'/');
        self.SPEND_ITEM_ADDR.select(&suffix).into_key()
    }

    pub fn balance_key(&self, address: &str) -> Vec<u8> {
        self.BALANCE_BY_ADDRESS.select(address.as_bytes()).into_key()
    }
}

impl Default for IndexTable {
    fn default() -> Self {
        Self::new()
    }
}

/* ---------------- record codecs ---------------- */

pub fn encode_record<T: BorshSerialize>(record: &T) -> Result<Vec<u8>, StoreError> {
    borsh::to_vec(record).map_err(|e| StoreError::Backend(format!("borsh encode failed: {e}")))
}

pub fn decode_record<T: BorshDeserialize>(bytes: &[u8], what: &str) -> Result<T, StoreError> {
    T::try_from_slice(bytes)
        .map_err(|e| StoreError::Backend(format!("borsh decode of {what} failed: {e}")))
}

/* ---------------- typed record operations ---------------- */

pub fn insert_block(
    table: &IndexTable,
    txn: &mut StoreTxn,
    block: &SchemaBlock,
) -> Result<(), StoreError> {
    txn.insert(&table.block_key(&block.hash), encode_record(block)?, "block hash")?;
    txn.insert(
        &table.block_height_key(block.height),
        block.hash.as_bytes().to_vec(),
        "block height",
    )?;
    Ok(())
}

pub fn update_block(
    table: &IndexTable,
    txn: &mut StoreTxn,
    block: &SchemaBlock,
) -> Result<(), StoreError> {
    txn.update(&table.block_key(&block.hash), encode_record(block)?, "block hash")
}

pub fn block_by_hash(
    table: &IndexTable,
    txn: &StoreTxn,
    hash: &str,
) -> Result<Option<SchemaBlock>, StoreError> {
    match txn.get(&table.block_key(hash))? {
        Some(bytes) => Ok(Some(decode_record(&bytes, "block record")?)),
        None => Ok(None),
    }
}

pub fn block_hash_at_height(
    table: &IndexTable,
    txn: &StoreTxn,
    height: i64,
) -> Result<Option<String>, StoreError> {
    match txn.get(&table.block_height_key(height))? {
        Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|e| {
            StoreError::Backend(format!("non-utf8 block hash at height {height}: {e}"))
        })?)),
        None => Ok(None),
    }
}

pub fn insert_tx(
    table: &IndexTable,
    txn: &mut StoreTxn,
    tx: &SchemaTx,
) -> Result<(), StoreError> {
    txn.insert(&table.tx_key(&tx.hash), encode_record(tx)?, "tx hash")?;
    txn.insert(&table.tx_id_key(tx.id), tx.hash.as_bytes().to_vec(), "tx id")?;
    Ok(())
}

pub fn tx_by_hash(
    table: &IndexTable,
    txn: &StoreTxn,
    hash: &str,
) -> Result<Option<SchemaTx>, StoreError> {
    match txn.get(&table.tx_key(hash))? {
        Some(bytes) => Ok(Some(decode_record(&bytes, "tx record")?)),
        None => Ok(None),
    }
}

/// Create the block <-> transaction link if it is not already there. The
/// same link can be revisited when a block is re-submitted, so this is a
/// check-then-insert rather than a bare insert.
pub fn link_block_tx(
    table: &IndexTable,
    txn: &mut StoreTxn,
    block_id: i64,
    tx_id: i64,
) -> Result<(), StoreError> {
    let key = table.block_tx_key(block_id, tx_id);
    if txn.get(&key)?.is_some() {
        return Ok(());
    }
    let link = SchemaBlockTx { id: txn.next_id("block_tx")?, block_id, tx_id };
    txn.insert(&key, encode_record(&link)?, "block_tx link")
}

pub fn insert_spend_item(
    table: &IndexTable,
    txn: &mut StoreTxn,
    item: &SchemaSpendItem,
) -> Result<(), StoreError> {
    txn.insert(
        &table.outpoint_key(item.out_tx_id, item.out_index),
        encode_record(item)?,
        "spenditem outpoint",
    )?;
    if !item.address.is_empty() {
        txn.put(&table.spend_item_addr_key(&item.address, item.out_tx_id, item.out_index), Vec::new());
    }
    Ok(())
}

pub fn update_spend_item(
    table: &IndexTable,
    txn: &mut StoreTxn,
    item: &SchemaSpendItem,
) -> Result<(), StoreError> {
    txn.update(
        &table.outpoint_key(item.out_tx_id, item.out_index),
        encode_record(item)?,
        "spenditem outpoint",
    )
}

/// Query scoped to the outpoint lookup key. The key layout makes a second
/// match impossible in a healthy index; the resolver still inspects the
/// full result set so a violated invariant surfaces as a distinct outcome
/// instead of silently picking a row.
pub fn spend_items_by_outpoint(
    table: &IndexTable,
    txn: &StoreTxn,
    out_tx_id: i64,
    out_index: i64,
) -> Result<Vec<SchemaSpendItem>, StoreError> {
    let prefix = table.outpoint_key(out_tx_id, out_index);
    let mut items = Vec::new();
    for (_k, v) in txn.scan_prefix(&prefix)? {
        items.push(decode_record(&v, "spenditem record")?);
    }
    Ok(items)
}

/// Every produced-output spend item owned by `address`, resolved through
/// the per-address marker rows.
pub fn spend_items_by_address(
    table: &IndexTable,
    txn: &StoreTxn,
    address: &str,
) -> Result<Vec<SchemaSpendItem>, StoreError> {
    let prefix = table.spend_item_addr_prefix(address);
    let mut items = Vec::new();
    for (k, _v) in txn.scan_prefix(&prefix)? {
        let tail = &k[prefix.len()..];
        if tail.len() != 16 {
            return Err(StoreError::Backend(format!(
                "malformed address marker row of length {}",
                tail.len()
            )));
        }
        let out_tx_id = i64::from_be_bytes(tail[..8].try_into().unwrap_or([0u8; 8]));
        let out_index = i64::from_be_bytes(tail[8..].try_into().unwrap_or([0u8; 8]));
        match txn.get(&table.outpoint_key(out_tx_id, out_index))? {
            Some(bytes) => items.push(decode_record(&bytes, "spenditem record")?),
            None => {
                return Err(StoreError::Backend(format!(
                    "address marker points at missing outpoint ({out_tx_id}, {out_index})"
                )));
            }
        }
    }
    Ok(items)
}

pub fn balance_by_address(
    table: &IndexTable,
    txn: &StoreTxn,
    address: &str,
) -> Result<Option<SchemaBalance>, StoreError> {
    match txn.get(&table.balance_key(address))? {
        Some(bytes) => Ok(Some(decode_record(&bytes, "balance record")?)),
        None => Ok(None),
    }
}

pub fn all_balances(
    table: &IndexTable,
    txn: &StoreTxn,
) -> Result<Vec<SchemaBalance>, StoreError> {
    let mut balances = Vec::new();
    for (_k, v) in txn.scan_prefix(table.BALANCE_BY_ADDRESS.key())? {
        balances.push(decode_record(&v, "balance record")?);
    }
    Ok(balances)
}

pub fn load_index_height(
    table: &IndexTable,
    txn: &StoreTxn,
) -> Result<Option<i64>, StoreError> {
    match txn.get(table.INDEX_HEIGHT.key())? {
        Some(bytes) => {
            let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                StoreError::Backend(format!("invalid /index_height length {}", bytes.len()))
            })?;
            Ok(Some(i64::from_le_bytes(arr)))
        }
        None => Ok(None),
    }
}

pub fn persist_index_height(table: &IndexTable, txn: &mut StoreTxn, height: i64) {
    txn.put(table.INDEX_HEIGHT.key(), height.to_le_bytes().to_vec());
}
