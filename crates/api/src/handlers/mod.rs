pub mod deploy;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod nodes;
pub mod proxy;
pub mod tasks;
