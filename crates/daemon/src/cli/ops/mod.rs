pub mod broker;
pub mod client;
pub mod health;
pub mod init;
pub mod version;
pub mod workload;

pub use broker::Broker;
pub use client::Client;
pub use health::Health;
pub use init::Init;
pub use version::Version;
pub use workload::Workload;
