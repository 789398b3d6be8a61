use std::fmt;

/// Why a consuming input was skipped instead of resolved. Skips are
/// recoverable at input granularity: they never abort the enclosing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No transaction record with the referenced previous hash. Expected
    /// during partial or backfill ingestion.
    UnknownPreviousTransaction { prev_tx_hash: String },
    /// The previous transaction is known but no produced output exists at
    /// the referenced index.
    DanglingInput { prev_tx_id: i64, prev_out_index: i64 },
    /// More than one produced output matched the outpoint. Indicates an
    /// upstream uniqueness violation; surfaced to operators.
    AmbiguousPreviousOutput { prev_tx_id: i64, prev_out_index: i64 },
    /// The matched output is already spent. Re-resolving must not apply
    /// the balance delta a second time.
    AlreadySpent { prev_tx_id: i64, prev_out_index: i64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownPreviousTransaction { prev_tx_hash } => {
                write!(f, "unknown previous transaction {prev_tx_hash}")
            }
            SkipReason::DanglingInput { prev_tx_id, prev_out_index } => {
                write!(f, "no output found for outpoint ({prev_tx_id}, {prev_out_index})")
            }
            SkipReason::AmbiguousPreviousOutput { prev_tx_id, prev_out_index } => {
                write!(f, "multiple outputs matched outpoint ({prev_tx_id}, {prev_out_index})")
            }
            SkipReason::AlreadySpent { prev_tx_id, prev_out_index } => {
                write!(f, "outpoint ({prev_tx_id}, {prev_out_index}) is already spent")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    AddressExtractionFailed { tx_hash: String, out_index: i64, reason: String },
    InputSkipped { tx_hash: String, reason: SkipReason },
    NegativeBalance { address: String, balance: i64 },
    BlockIndexed { height: i64, hash: String, outputs: usize, spends: usize, skips: usize },
    BlockAlreadyIndexed { height: i64, hash: String },
}

/// Structured event sink carried in the ingest context. Every event is
/// recorded for callers and tests; operator lines go to stderr unless the
/// sink is quiet.
pub struct EventSink {
    quiet: bool,
    events: Vec<IngestEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        Self { quiet: false, events: Vec::new() }
    }

    pub fn quiet() -> Self {
        Self { quiet: true, events: Vec::new() }
    }

    pub fn emit(&mut self, event: IngestEvent) {
        if !self.quiet {
            match &event {
                IngestEvent::AddressExtractionFailed { tx_hash, out_index, reason } => {
                    eprintln!(
                        "[index] address extraction failed for {tx_hash}:{out_index}: {reason}"
                    );
                }
                IngestEvent::InputSkipped { tx_hash, reason } => {
                    eprintln!("[index] skipped input of {tx_hash}: {reason}");
                }
                IngestEvent::NegativeBalance { address, balance } => {
                    eprintln!("[index] balance of {address} went negative: {balance}");
                }
                IngestEvent::BlockIndexed { height, hash, outputs, spends, skips } => {
                    eprintln!(
                        "[index] block #{height} {hash}: {outputs} outputs, {spends} spends, {skips} skipped"
                    );
                }
                IngestEvent::BlockAlreadyIndexed { height, hash } => {
                    eprintln!("[index] block #{height} {hash} already indexed, nothing to do");
                }
            }
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[IngestEvent] {
        &self.events
    }

    /// Hand the recorded events over, leaving the sink empty for the next
    /// block.
    pub fn drain(&mut self) -> Vec<IngestEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
