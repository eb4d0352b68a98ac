pub mod cache;
pub mod orchestrator;
pub mod store;
pub mod terminal;
pub mod vault;
pub mod worker;
