use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::decoded::DecodedBlock;

/// Block source backed by a JSON file holding an array of decoded blocks.
/// Spend resolution assumes every referenced earlier block is already
/// committed, so the file must be ascending in height; anything else is
/// rejected up front.
pub struct FileBlockSource {
    blocks: Vec<DecodedBlock>,
}

impl FileBlockSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read blocks file {}", path.display()))?;
        let blocks: Vec<DecodedBlock> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse blocks file {}", path.display()))?;

        for pair in blocks.windows(2) {
            if pair[1].height <= pair[0].height {
                return Err(anyhow!(
                    "blocks file is not ascending in height: {} follows {}",
                    pair[1].height,
                    pair[0].height
                ));
            }
        }
        Ok(Self { blocks })
    }

    /// Blocks at heights strictly above `after`, in ingestion order.
    pub fn blocks_after(&self, after: i64) -> impl Iterator<Item = &DecodedBlock> {
        self.blocks.iter().filter(move |b| b.height > after)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
