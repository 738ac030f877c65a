pub mod broker;
pub mod client;
pub mod workload;
