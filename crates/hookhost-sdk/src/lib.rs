//! # hookhost-sdk
//!
//! SDK for writing HookHost units.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hookhost_sdk::prelude::*;
//!
//! let unit = UnitExportBuilder::new(unit_info!(name: "Greeter", version: "1.0.0"))
//!     .requires("Chat")
//!     .on("OnPlayerChat", |args| {
//!         let muted = args.first().and_then(HookValue::as_str) == Some("spam");
//!         Ok(if muted { HookValue::Bool(false) } else { HookValue::Null })
//!     })
//!     .build_arc();
//!
//! factories.register("greeter", move || unit.clone());
//! ```
//!
//! Shared-library units (host built with the `dynamic` feature) export
//! their constructor with [`declare_unit!`].

pub mod exports;
pub mod macros;
pub mod simple;

pub use exports::UnitExportBuilder;
pub use simple::SimpleUnit;

/// Prelude for convenient imports.
pub mod prelude {
    pub use hookhost_core::error::AppError;
    pub use hookhost_core::result::AppResult;
    pub use hookhost_runtime::prelude::*;

    pub use crate::declare_unit;
    pub use crate::exports::UnitExportBuilder;
    pub use crate::simple::SimpleUnit;
}
