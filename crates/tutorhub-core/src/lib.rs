pub mod config;
pub mod error;
pub mod models;
pub mod password;
pub mod validation;

pub use config::*;
pub use error::*;
pub use models::*;
pub use password::{hash_password, verify_password};
