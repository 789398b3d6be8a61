pub mod mdb;
pub mod store;
