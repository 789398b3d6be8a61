use std::sync::Arc;

use anyhow::anyhow;
use rocksdb::{DB, Options};
use tempfile::TempDir;

use utxoindex::core::decoded::{DecodedBlock, DecodedInput, DecodedOutput, DecodedTransaction};
use utxoindex::index::events::{IngestEvent, SkipReason};
use utxoindex::index::ingest::{IngestOutcome, Ingestor};
use utxoindex::index::storage;
use utxoindex::runtime::mdb::Mdb;
use utxoindex::runtime::store::RecordStore;

/* ---------------- fixtures ---------------- */

fn open_ingestor() -> (TempDir, Ingestor) {
    let dir = TempDir::new().expect("tempdir");
    let mut opts = Options::default();
    opts.create_if_missing(true);
    let db = Arc::new(DB::open(&opts, dir.path()).expect("open rocksdb"));
    let store = RecordStore::new(Mdb::from_db(db, b"utxoindex:"));
    // Deterministic extractor so tests control address ownership via the
    // first script byte. 0x6a plays the unspendable-script role.
    let ingestor = Ingestor::with_extractor(
        store,
        Arc::new(|script: &[u8]| match script.first() {
            Some(0x6a) => Err(anyhow!("unspendable script")),
            Some(b) => Ok(format!("addr-{b:02x}")),
            None => Err(anyhow!("empty script")),
        }),
    )
    .silence();
    (dir, ingestor)
}

fn coinbase(hash: &str, outputs: Vec<DecodedOutput>) -> DecodedTransaction {
    DecodedTransaction { hash: hash.into(), is_coinbase: true, outputs, inputs: vec![] }
}

fn spend(hash: &str, inputs: Vec<(&str, i64)>, outputs: Vec<DecodedOutput>) -> DecodedTransaction {
    DecodedTransaction {
        hash: hash.into(),
        is_coinbase: false,
        outputs,
        inputs: inputs
            .into_iter()
            .map(|(prev, idx)| DecodedInput {
                prev_tx_hash: prev.into(),
                prev_out_index: idx,
                unlock_script: vec![0xab],
            })
            .collect(),
    }
}

fn out(script_tag: u8, value: i64) -> DecodedOutput {
    DecodedOutput { script: vec![script_tag], value }
}

fn block(height: i64, hash: &str, prev_hash: &str, txs: Vec<DecodedTransaction>) -> DecodedBlock {
    DecodedBlock {
        height,
        hash: hash.into(),
        prev_hash: prev_hash.into(),
        next_hash: String::new(),
        merkle_root: format!("mr{height}"),
        time: 1231006505 + height,
        version: 1,
        nonce: 0,
        bits: 0x1d00ffff,
        transactions: txs,
    }
}

fn balance_of(ingestor: &Ingestor, address: &str) -> i64 {
    let txn = ingestor.store().begin();
    storage::balance_by_address(ingestor.table(), &txn, address)
        .expect("balance query")
        .map(|b| b.balance)
        .unwrap_or(0)
}

/// Conservation invariant: every address balance equals the summed value
/// of its unspent outputs.
fn assert_balances_conserved(ingestor: &Ingestor) {
    let txn = ingestor.store().begin();
    for balance in storage::all_balances(ingestor.table(), &txn).expect("all balances") {
        let unspent: i64 = storage::spend_items_by_address(ingestor.table(), &txn, &balance.address)
            .expect("items by address")
            .iter()
            .filter(|i| !i.is_spent())
            .map(|i| i.value)
            .sum();
        assert_eq!(
            balance.balance, unspent,
            "balance of {} diverged from its unspent outputs",
            balance.address
        );
    }
}

/* ---------------- scenarios ---------------- */

#[test]
fn coinbase_block_credits_miner_without_input_resolution() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 5_000_000_000)])]);

    let report = ingestor.ingest_block(&b0).expect("ingest");
    assert_eq!(report.outcome, IngestOutcome::Indexed);
    assert_eq!(report.outputs_indexed, 1);
    assert_eq!(report.inputs_resolved, 0);
    assert_eq!(report.inputs_skipped, 0);

    assert_eq!(balance_of(&ingestor, "addr-01"), 5_000_000_000);
    assert_eq!(ingestor.index_height().expect("height"), Some(0));
    assert_balances_conserved(&ingestor);
}

#[test]
fn cross_block_spend_moves_value_and_marks_outpoint_spent() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 1000)])]);
    let b1 = block(
        1,
        "b1",
        "b0",
        vec![
            coinbase("cb1", vec![out(0x03, 1000)]),
            spend("s1", vec![("cb0", 0)], vec![out(0x02, 600), out(0x01, 400)]),
        ],
    );

    ingestor.ingest_block(&b0).expect("ingest b0");
    let report = ingestor.ingest_block(&b1).expect("ingest b1");
    assert_eq!(report.inputs_resolved, 1);
    assert_eq!(report.inputs_skipped, 0);

    // cb0's output moved: 600 to addr-02, 400 back to addr-01.
    assert_eq!(balance_of(&ingestor, "addr-01"), 400);
    assert_eq!(balance_of(&ingestor, "addr-02"), 600);
    assert_eq!(balance_of(&ingestor, "addr-03"), 1000);

    let txn = ingestor.store().begin();
    let cb0 = storage::tx_by_hash(ingestor.table(), &txn, "cb0").expect("query").expect("row");
    let spent =
        storage::spend_items_by_outpoint(ingestor.table(), &txn, cb0.id, 0).expect("query");
    assert_eq!(spent.len(), 1);
    assert!(spent[0].is_spent());
    assert_eq!(spent[0].in_script, vec![0xab]);

    let s1 = storage::tx_by_hash(ingestor.table(), &txn, "s1").expect("query").expect("row");
    assert_eq!(spent[0].in_tx_id, s1.id);
    drop(txn);

    assert_balances_conserved(&ingestor);
}

#[test]
fn intra_block_spend_resolves_against_same_block_outputs() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(
        0,
        "b0",
        "",
        vec![
            coinbase("cb0", vec![out(0x01, 1000)]),
            spend("s0", vec![("cb0", 0)], vec![out(0x02, 1000)]),
        ],
    );

    let report = ingestor.ingest_block(&b0).expect("ingest");
    assert_eq!(report.outputs_indexed, 2);
    assert_eq!(report.inputs_resolved, 1);
    assert_eq!(balance_of(&ingestor, "addr-01"), 0);
    assert_eq!(balance_of(&ingestor, "addr-02"), 1000);
    assert_balances_conserved(&ingestor);
}

#[test]
fn unknown_previous_transaction_skips_input_but_commits_block() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(
        0,
        "b0",
        "",
        vec![
            coinbase("cb0", vec![out(0x01, 1000)]),
            spend("s0", vec![("nowhere", 0)], vec![out(0x02, 500)]),
        ],
    );

    let report = ingestor.ingest_block(&b0).expect("ingest");
    assert_eq!(report.outcome, IngestOutcome::Indexed);
    assert_eq!(report.inputs_resolved, 0);
    assert_eq!(report.inputs_skipped, 1);
    assert!(report.events.iter().any(|e| matches!(
        e,
        IngestEvent::InputSkipped {
            tx_hash,
            reason: SkipReason::UnknownPreviousTransaction { prev_tx_hash },
        } if tx_hash == "s0" && prev_tx_hash == "nowhere"
    )));

    // The skipped input debited nothing; s0's own output still credits.
    assert_eq!(balance_of(&ingestor, "addr-01"), 1000);
    assert_eq!(balance_of(&ingestor, "addr-02"), 500);
    assert_eq!(ingestor.index_height().expect("height"), Some(0));
}

#[test]
fn dangling_input_skips_without_balance_change() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 1000)])]);
    // cb0 has no output at index 9.
    let b1 = block(
        1,
        "b1",
        "b0",
        vec![
            coinbase("cb1", vec![out(0x03, 1000)]),
            spend("s1", vec![("cb0", 9)], vec![out(0x02, 500)]),
        ],
    );

    ingestor.ingest_block(&b0).expect("ingest b0");
    let report = ingestor.ingest_block(&b1).expect("ingest b1");
    assert_eq!(report.inputs_skipped, 1);
    assert!(report.events.iter().any(|e| matches!(
        e,
        IngestEvent::InputSkipped { reason: SkipReason::DanglingInput { prev_out_index: 9, .. }, .. }
    )));
    assert_eq!(balance_of(&ingestor, "addr-01"), 1000);
}

#[test]
fn resubmitted_block_is_reported_and_writes_nothing() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 1000)])]);

    ingestor.ingest_block(&b0).expect("first ingest");
    let report = ingestor.ingest_block(&b0).expect("second ingest");
    assert_eq!(report.outcome, IngestOutcome::AlreadyIndexed);
    assert_eq!(report.outputs_indexed, 0);

    // Exactly one credit survived.
    assert_eq!(balance_of(&ingestor, "addr-01"), 1000);
    let txn = ingestor.store().begin();
    let cb0 = storage::tx_by_hash(ingestor.table(), &txn, "cb0").expect("query").expect("row");
    assert_eq!(cb0.id, 1);
}

#[test]
fn out_of_order_height_is_rejected() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 1000)])]);
    let b1 = block(1, "b1", "b0", vec![coinbase("cb1", vec![out(0x02, 1000)])]);
    let stale = block(1, "b1-fork", "b0", vec![coinbase("cb1f", vec![out(0x04, 1000)])]);

    ingestor.ingest_block(&b0).expect("ingest b0");
    ingestor.ingest_block(&b1).expect("ingest b1");
    let err = ingestor.ingest_block(&stale).expect_err("stale height");
    assert!(err.to_string().contains("ascending height order"));

    // The rejected block left no trace.
    assert_eq!(balance_of(&ingestor, "addr-04"), 0);
    let txn = ingestor.store().begin();
    assert!(storage::block_by_hash(ingestor.table(), &txn, "b1-fork").expect("query").is_none());
}

#[test]
fn malformed_block_leaves_store_untouched() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 1000)])]);
    ingestor.ingest_block(&b0).expect("ingest b0");

    // Block whose second transaction carries a negative output value.
    let bad = block(
        1,
        "b1",
        "b0",
        vec![
            coinbase("cb1", vec![out(0x02, 1000)]),
            spend("s1", vec![("cb0", 0)], vec![out(0x03, -7)]),
        ],
    );
    let err = ingestor.ingest_block(&bad).expect_err("malformed");
    assert!(err.to_string().contains("negative output value"));

    assert_eq!(ingestor.index_height().expect("height"), Some(0));
    let txn = ingestor.store().begin();
    assert!(storage::block_by_hash(ingestor.table(), &txn, "b1").expect("query").is_none());
    drop(txn);
    assert_eq!(balance_of(&ingestor, "addr-01"), 1000);
    assert_eq!(balance_of(&ingestor, "addr-02"), 0);
}

#[test]
fn colliding_outpoints_roll_back_the_whole_block() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 1000)])]);
    ingestor.ingest_block(&b0).expect("ingest b0");

    // The same transaction listed twice decomposes into two produced
    // outputs for one outpoint; the second insert violates uniqueness.
    let b1 = block(
        1,
        "b1",
        "b0",
        vec![
            coinbase("cb1", vec![out(0x02, 1000)]),
            spend("s1", vec![("cb0", 0)], vec![out(0x03, 1000)]),
            spend("s1", vec![("cb0", 0)], vec![out(0x03, 1000)]),
        ],
    );
    let err = ingestor.ingest_block(&b1).expect_err("uniqueness violation");
    assert!(err.to_string().contains("duplicate key"));

    // Nothing of b1 survived, including the coinbase credit.
    assert_eq!(ingestor.index_height().expect("height"), Some(0));
    assert_eq!(balance_of(&ingestor, "addr-02"), 0);
    assert_eq!(balance_of(&ingestor, "addr-01"), 1000);
    let txn = ingestor.store().begin();
    assert!(storage::block_by_hash(ingestor.table(), &txn, "b1").expect("query").is_none());
    assert!(storage::tx_by_hash(ingestor.table(), &txn, "s1").expect("query").is_none());
}

#[test]
fn aborted_block_events_stay_out_of_the_next_report() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 1000)])]);
    ingestor.ingest_block(&b0).expect("ingest b0");

    // This block records an extraction failure before the duplicated
    // transaction aborts it on the outpoint uniqueness violation.
    let bad = block(
        1,
        "b1",
        "b0",
        vec![
            coinbase("cb1", vec![out(0x6a, 0), out(0x02, 1000)]),
            spend("s1", vec![("cb0", 0)], vec![out(0x03, 1000)]),
            spend("s1", vec![("cb0", 0)], vec![out(0x03, 1000)]),
        ],
    );
    ingestor.ingest_block(&bad).expect_err("uniqueness violation");

    let clean = block(1, "b1-good", "b0", vec![coinbase("cb1g", vec![out(0x04, 1000)])]);
    let report = ingestor.ingest_block(&clean).expect("ingest clean block");
    assert_eq!(report.outcome, IngestOutcome::Indexed);
    // Only the clean block's own events are reported.
    assert!(
        !report
            .events
            .iter()
            .any(|e| matches!(e, IngestEvent::AddressExtractionFailed { .. })),
        "events of the aborted block leaked into the next report"
    );
    assert!(report.events.iter().all(|e| matches!(
        e,
        IngestEvent::BlockIndexed { hash, .. } if hash == "b1-good"
    )));
}

#[test]
fn predecessor_next_hash_is_linked_once() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 1000)])]);
    let b1 = block(1, "b1", "b0", vec![coinbase("cb1", vec![out(0x02, 1000)])]);
    let b2 = block(2, "b2", "b1", vec![coinbase("cb2", vec![out(0x03, 1000)])]);

    ingestor.ingest_block(&b0).expect("ingest b0");
    ingestor.ingest_block(&b1).expect("ingest b1");
    ingestor.ingest_block(&b2).expect("ingest b2");

    let txn = ingestor.store().begin();
    let r0 = storage::block_by_hash(ingestor.table(), &txn, "b0").expect("query").expect("row");
    assert_eq!(r0.next_hash, "b1");
    let r1 = storage::block_by_hash(ingestor.table(), &txn, "b1").expect("query").expect("row");
    assert_eq!(r1.next_hash, "b2");
    let r2 = storage::block_by_hash(ingestor.table(), &txn, "b2").expect("query").expect("row");
    assert!(r2.next_hash.is_empty());

    // Height rows resolve back to hashes.
    assert_eq!(
        storage::block_hash_at_height(ingestor.table(), &txn, 1).expect("query"),
        Some("b1".to_string())
    );
}

#[test]
fn unspendable_output_is_indexed_without_balance_row() {
    let (_dir, mut ingestor) = open_ingestor();
    let b0 = block(
        0,
        "b0",
        "",
        vec![coinbase("cb0", vec![out(0x01, 1000), out(0x6a, 0)])],
    );

    let report = ingestor.ingest_block(&b0).expect("ingest");
    assert_eq!(report.outputs_indexed, 2);
    assert!(report.events.iter().any(|e| matches!(
        e,
        IngestEvent::AddressExtractionFailed { tx_hash, out_index: 1, .. } if tx_hash == "cb0"
    )));

    let txn = ingestor.store().begin();
    let cb0 = storage::tx_by_hash(ingestor.table(), &txn, "cb0").expect("query").expect("row");
    let items = storage::spend_items_by_outpoint(ingestor.table(), &txn, cb0.id, 1).expect("query");
    assert_eq!(items.len(), 1);
    assert!(items[0].address.is_empty());
    // No balance row was materialized for the empty address.
    let balances = storage::all_balances(ingestor.table(), &txn).expect("all balances");
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].address, "addr-01");
}

#[test]
fn multi_block_chain_keeps_conservation_invariant() {
    let (_dir, mut ingestor) = open_ingestor();
    let chain = vec![
        block(0, "b0", "", vec![coinbase("cb0", vec![out(0x01, 5000)])]),
        block(
            1,
            "b1",
            "b0",
            vec![
                coinbase("cb1", vec![out(0x02, 5000)]),
                spend("s1", vec![("cb0", 0)], vec![out(0x03, 2000), out(0x01, 3000)]),
            ],
        ),
        block(
            2,
            "b2",
            "b1",
            vec![
                coinbase("cb2", vec![out(0x01, 5000)]),
                spend("s2", vec![("s1", 0), ("s1", 1)], vec![out(0x04, 5000)]),
            ],
        ),
    ];

    for b in &chain {
        ingestor.ingest_block(b).expect("ingest");
    }

    assert_eq!(balance_of(&ingestor, "addr-01"), 5000);
    assert_eq!(balance_of(&ingestor, "addr-02"), 5000);
    assert_eq!(balance_of(&ingestor, "addr-03"), 0);
    assert_eq!(balance_of(&ingestor, "addr-04"), 5000);
    assert_eq!(ingestor.index_height().expect("height"), Some(2));
    assert_balances_conserved(&ingestor);
}
