//! A unit assembled from closures.

use std::fmt;
use std::sync::Arc;

use hookhost_runtime::unit::{HookExport, Unit, UnitContext, UnitInfo, UnitReference};

pub(crate) type InitFn = Arc<dyn Fn(&UnitContext) -> Result<(), String> + Send + Sync>;
pub(crate) type UnloadFn = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Unit built by [`UnitExportBuilder`](crate::UnitExportBuilder).
#[derive(Clone)]
pub struct SimpleUnit {
    pub(crate) info: UnitInfo,
    pub(crate) references: Vec<UnitReference>,
    pub(crate) exports: Vec<HookExport>,
    pub(crate) ignored: Vec<String>,
    pub(crate) on_init: Option<InitFn>,
    pub(crate) on_unload: Option<UnloadFn>,
}

impl fmt::Debug for SimpleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleUnit")
            .field("name", &self.info.name)
            .field("version", &self.info.version.to_string())
            .field("exports", &self.exports.len())
            .finish()
    }
}

impl Unit for SimpleUnit {
    fn info(&self) -> UnitInfo {
        self.info.clone()
    }

    fn references(&self) -> Vec<UnitReference> {
        self.references.clone()
    }

    fn exports(&self) -> Vec<HookExport> {
        self.exports.clone()
    }

    fn ignored_hooks(&self) -> Vec<String> {
        self.ignored.clone()
    }

    fn on_init(&self, ctx: &UnitContext) -> Result<(), String> {
        match &self.on_init {
            Some(init) => init(ctx),
            None => Ok(()),
        }
    }

    fn on_unload(&self) -> Result<(), String> {
        match &self.on_unload {
            Some(unload) => unload(),
            None => Ok(()),
        }
    }
}
