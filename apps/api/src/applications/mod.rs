pub mod aggregator;
pub mod handlers;
pub mod lifecycle;
#[cfg(test)]
pub mod memory;
pub mod service;
pub mod store;
