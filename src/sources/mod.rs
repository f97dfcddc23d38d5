pub mod monitoring_api;

pub use monitoring_api::{FetchError, MonitoringApi, MonitoringApiClient};
