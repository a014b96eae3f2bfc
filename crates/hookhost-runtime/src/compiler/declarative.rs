//! Units described entirely by a manifest: each hook maps to a fixed action.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::hooks::definitions::HookValue;
use crate::unit::{HookExport, HookFault, HookHandler, HookReturn, Unit, UnitInfo, UnitReference};

/// What a declarative hook does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    /// Return `value`.
    Return,
    /// Log `value` and the arguments, return nothing.
    Log,
    /// Overwrite by-ref argument `arg` with `value`.
    Set,
}

impl HookAction {
    /// Parses a manifest action name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "return" => Some(Self::Return),
            "log" => Some(Self::Log),
            "set" => Some(Self::Set),
            _ => None,
        }
    }
}

/// One hook entry of a declarative unit.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredHook {
    /// Hook or method name.
    pub name: String,
    /// Action.
    pub action: HookAction,
    /// Payload of the action.
    pub value: HookValue,
    /// Target argument for [`HookAction::Set`].
    pub arg: usize,
    /// Arity restriction.
    pub arity: Option<usize>,
    /// Runs detached from dispatch.
    pub is_async: bool,
}

/// A unit whose behavior is data.
#[derive(Debug, Clone)]
pub struct DeclarativeUnit {
    info: UnitInfo,
    references: Vec<UnitReference>,
    ignored: Vec<String>,
    hooks: Vec<DeclaredHook>,
}

impl DeclarativeUnit {
    /// Creates a declarative unit.
    pub fn new(
        info: UnitInfo,
        references: Vec<UnitReference>,
        ignored: Vec<String>,
        hooks: Vec<DeclaredHook>,
    ) -> Self {
        Self {
            info,
            references,
            ignored,
            hooks,
        }
    }
}

impl Unit for DeclarativeUnit {
    fn info(&self) -> UnitInfo {
        self.info.clone()
    }

    fn references(&self) -> Vec<UnitReference> {
        self.references.clone()
    }

    fn exports(&self) -> Vec<HookExport> {
        self.hooks
            .iter()
            .map(|hook| {
                let handler = ActionHandler {
                    unit: self.info.name.clone(),
                    hook: hook.clone(),
                };
                let mut export = HookExport::new(hook.name.clone(), Arc::new(handler));
                if hook.action == HookAction::Set {
                    export = export.by_ref();
                }
                if hook.is_async {
                    export = export.asynchronous();
                }
                if let Some(arity) = hook.arity {
                    export = export.with_arity(arity);
                }
                export
            })
            .collect()
    }

    fn ignored_hooks(&self) -> Vec<String> {
        self.ignored.clone()
    }
}

struct ActionHandler {
    unit: String,
    hook: DeclaredHook,
}

impl HookHandler for ActionHandler {
    fn call(&self, args: &[HookValue]) -> HookReturn {
        match self.hook.action {
            HookAction::Return => Ok(self.hook.value.clone()),
            HookAction::Log => {
                info!(unit = %self.unit, hook = %self.hook.name, message = %self.hook.value, args = ?args, "Unit log");
                Ok(HookValue::Null)
            }
            HookAction::Set => Ok(HookValue::Null),
        }
    }

    fn call_by_ref(&self, args: &mut [HookValue]) -> HookReturn {
        if self.hook.action != HookAction::Set {
            return self.call(args);
        }
        let count = args.len();
        let slot = args.get_mut(self.hook.arg).ok_or_else(|| {
            HookFault::failed(format!(
                "argument {} out of range for {} arguments",
                self.hook.arg, count
            ))
        })?;
        *slot = self.hook.value.clone();
        Ok(HookValue::Null)
    }
}
