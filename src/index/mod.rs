pub mod addresses;
pub mod balances;
pub mod decompose;
pub mod events;
pub mod ingest;
pub mod resolve;
pub mod storage;
