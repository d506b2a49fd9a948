// src/lib.rs
pub mod errors;
pub mod queue;
pub mod store;
pub mod strategy;
pub mod types;
pub mod worker;
