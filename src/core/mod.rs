pub mod blocksource;
pub mod decoded;
