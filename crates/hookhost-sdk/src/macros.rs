//! Macros for shared-library units.

/// Exports the constructor a host with the `dynamic` feature looks for.
///
/// # Example
/// ```rust,ignore
/// hookhost_sdk::declare_unit!(
///     UnitExportBuilder::new(unit_info!(name: "Native", version: "1.0.0"))
///         .on("OnTick", |_| Ok(HookValue::Null))
///         .build()
/// );
/// ```
#[macro_export]
macro_rules! declare_unit {
    ($unit:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn hookhost_create_unit()
        -> *mut ::std::boxed::Box<dyn $crate::prelude::Unit> {
            let unit: ::std::boxed::Box<dyn $crate::prelude::Unit> = ::std::boxed::Box::new($unit);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(unit))
        }
    };
}
