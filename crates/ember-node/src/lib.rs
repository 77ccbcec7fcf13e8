pub mod driver;
pub mod network;
pub mod producer;
pub mod storage;

pub use driver::ConsensusDriver;
pub use network::{mesh, ChannelNetwork};
pub use producer::{BlockProducer, QueueProducer};
pub use storage::MemoryHeaderStorage;
