#![warn(clippy::unwrap_used)]

pub mod faults;
pub mod fixtures;
pub mod memory;

pub use faults::{FaultInjector, StoreOp};
pub use fixtures::{PoolFixture, StoreFixtures};
pub use memory::MemoryStore;
