pub mod context;
pub mod factory;
pub mod sink;
pub mod store;
pub mod transport;
