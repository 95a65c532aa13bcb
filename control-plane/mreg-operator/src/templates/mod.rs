pub mod deployment;
pub mod manager;
pub mod service;
pub mod service_account;

pub use deployment::DeploymentTemplate;
pub use manager::*;
pub use service::ServiceTemplate;
pub use service_account::ServiceAccountTemplate;
