pub mod memory;
pub mod protocol;

pub use memory::InMemoryCoordinator;
