pub mod collaborator;
pub mod repository;
pub mod scheduler;

pub use collaborator::*;
pub use repository::*;
pub use scheduler::*;
