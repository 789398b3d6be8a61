use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Already-decoded block as delivered by the external decoding collaborator.
/// Field types mirror the ingestion interface: heights and values are i64,
/// header fields u32, hashes hex strings, scripts raw bytes.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DecodedBlock {
    pub height: i64,
    pub hash: String,
    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub next_hash: String,
    pub merkle_root: String,
    pub time: i64,
    pub version: u32,
    pub nonce: u32,
    pub bits: u32,
    pub transactions: Vec<DecodedTransaction>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DecodedTransaction {
    pub hash: String,
    pub is_coinbase: bool,
    pub outputs: Vec<DecodedOutput>,
    /// Empty for coinbase transactions (the synthetic input is dropped at
    /// the decoding boundary; there is no previous output to consume).
    #[serde(default)]
    pub inputs: Vec<DecodedInput>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DecodedOutput {
    #[serde(with = "hex_bytes")]
    pub script: Vec<u8>,
    pub value: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DecodedInput {
    pub prev_tx_hash: String,
    pub prev_out_index: i64,
    #[serde(with = "hex_bytes", default)]
    pub unlock_script: Vec<u8>,
}

impl DecodedBlock {
    /// Validate the decoded structure at the ingestion boundary. Anything
    /// a well-formed decoder cannot emit is rejected here as
    /// [`IngestError::Malformed`] instead of surfacing later as index
    /// corruption.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.height < 0 {
            return Err(IngestError::Malformed(format!("negative block height {}", self.height)));
        }
        if self.hash.is_empty() {
            return Err(IngestError::Malformed(format!(
                "block at height {} has an empty hash",
                self.height
            )));
        }
        for (idx, tx) in self.transactions.iter().enumerate() {
            if tx.hash.is_empty() {
                return Err(IngestError::Malformed(format!(
                    "transaction #{idx} in block {} has an empty hash",
                    self.hash
                )));
            }
            if tx.is_coinbase != (idx == 0) {
                return Err(IngestError::Malformed(format!(
                    "transaction {} has is_coinbase={} at position {idx}",
                    tx.hash, tx.is_coinbase
                )));
            }
            if !tx.is_coinbase && tx.inputs.is_empty() {
                return Err(IngestError::Malformed(format!(
                    "non-coinbase transaction {} has no inputs",
                    tx.hash
                )));
            }
            for out in tx.outputs.iter() {
                if out.value < 0 {
                    return Err(IngestError::Malformed(format!(
                        "transaction {} carries a negative output value {}",
                        tx.hash, out.value
                    )));
                }
            }
            for input in tx.inputs.iter() {
                if input.prev_tx_hash.is_empty() {
                    return Err(IngestError::Malformed(format!(
                        "input of transaction {} references an empty previous hash",
                        tx.hash
                    )));
                }
                if input.prev_out_index < 0 {
                    return Err(IngestError::Malformed(format!(
                        "input of transaction {} references negative output index {}",
                        tx.hash, input.prev_out_index
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Scripts travel as hex strings in the JSON form of the interface.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
