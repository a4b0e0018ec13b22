pub mod config;
pub mod error;

pub use config::NestedAesConfig;
pub use error::{CoreError, CoreResult};
