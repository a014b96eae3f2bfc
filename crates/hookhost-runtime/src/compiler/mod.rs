//! Built-in unit compilers.

pub mod declarative;
#[cfg(feature = "dynamic")]
pub mod dynamic;
pub mod manifest;

use std::path::Path;
use std::sync::Arc;

pub use declarative::{DeclarativeUnit, DeclaredHook, HookAction};
#[cfg(feature = "dynamic")]
pub use dynamic::DynamicCompiler;
pub use manifest::{FactoryCatalog, ManifestCompiler, UnitFactory};

use crate::loader::{CompiledSource, Diagnostic, SourceUnit, UnitCompiler};

/// Routes each source to the first compiler that accepts it.
#[derive(Clone, Default)]
pub struct CompilerChain {
    compilers: Vec<Arc<dyn UnitCompiler>>,
}

impl std::fmt::Debug for CompilerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerChain")
            .field("compilers", &self.compilers.len())
            .finish()
    }
}

impl CompilerChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a compiler.
    pub fn with(mut self, compiler: Arc<dyn UnitCompiler>) -> Self {
        self.compilers.push(compiler);
        self
    }
}

impl UnitCompiler for CompilerChain {
    fn compile(&self, source: &SourceUnit) -> Result<CompiledSource, Vec<Diagnostic>> {
        match self.compilers.iter().find(|c| c.accepts(&source.path)) {
            Some(compiler) => compiler.compile(source),
            None => Err(vec![Diagnostic::error(
                "unsupported-source",
                format!("No compiler handles '{}'", source.path.display()),
            )]),
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        self.compilers.iter().any(|c| c.accepts(path))
    }
}
