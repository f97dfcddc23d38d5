pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod metrics_server;
pub mod observability;
pub mod reconcile;
pub mod scheduler;
pub mod sinks;
pub mod sources;
pub mod window;

pub use domain::SiteEnergy;
pub use scheduler::PollScheduler;
