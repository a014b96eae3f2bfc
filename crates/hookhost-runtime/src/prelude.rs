//! Prelude for convenient imports.

pub use crate::hooks::{
    ArgMode, HookArgs, HookDefinition, HookValue, PatchDescriptor, ResultPolicy,
};
pub use crate::manager::HookRuntime;
pub use crate::traits::{FnHandler, FnRefHandler};
pub use crate::unit::{
    HookExport, HookFault, HookHandler, HookReturn, Unit, UnitContext, UnitInfo, UnitRef,
    UnitReference,
};

pub use crate::{hook_args, unit_info};
