pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Broker, Client, Health, Init, Version, Workload};
