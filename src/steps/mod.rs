//! Typed remote scripts, one module per deployment stage.
//!
//! Each struct maps its fields onto the shell text the stage runs remotely.
//! The transfer stage is not a script (it goes through SFTP) and lives in
//! [`crate::transport::UploadPlan`].

pub mod clean;
pub mod dependencies;
pub mod runtime;
pub mod secrets;
pub mod services;

pub use clean::CleanArgs;
pub use dependencies::DependenciesArgs;
pub use runtime::RuntimeArgs;
pub use secrets::SecretsArgs;
pub use services::ServicesArgs;
