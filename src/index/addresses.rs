use anyhow::{Result, anyhow};
use bitcoin::{Address, Network, ScriptBuf};

/// Script -> address extraction, the external collaborator contract of the
/// decomposer. Unknown script kinds are errors; the caller indexes the
/// item with an empty address and keeps going.
pub fn extract_address(script: &[u8], network: Network) -> Result<String> {
    let spk = ScriptBuf::from_bytes(script.to_vec());
    Address::from_script(spk.as_script(), network)
        .map(|a| a.to_string())
        .map_err(|e| anyhow!("no address for script {}: {e}", hex::encode(script)))
}
