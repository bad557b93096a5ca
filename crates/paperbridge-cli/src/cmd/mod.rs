pub mod ledger;
pub mod pending;
pub mod render;
pub mod serve;
pub mod sync;
