pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;
pub mod validation;

pub use config::*;
pub use errors::*;
pub use logging::*;
pub use models::*;
pub use traits::*;
