//! # hookhost-core
//!
//! Core crate for HookHost. Contains the configuration schemas and the
//! unified error system shared by the runtime, the SDK and the host binary.
//!
//! This crate has **no** internal dependencies on other HookHost crates.

pub mod config;
pub mod error;
pub mod result;

pub use config::HostConfig;
pub use error::{AppError, ErrorKind};
pub use result::AppResult;
