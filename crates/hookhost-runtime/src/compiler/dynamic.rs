//! Native units from shared libraries (`dynamic` feature).
//!
//! A library exports `hookhost_create_unit`, returning a leaked
//! `Box<Box<dyn Unit>>`. The library is shadow-copied to a uniquely named
//! file before loading, so rebuilding it in place and reloading really
//! picks up the new code. Loaded libraries are never closed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::loader::{CompiledSource, Diagnostic, SourceUnit, UnitCompiler};
use crate::unit::Unit;

/// Symbol every unit library must export.
pub const CREATE_SYMBOL: &[u8] = b"hookhost_create_unit";

/// Signature of [`CREATE_SYMBOL`].
pub type CreateUnitFn = unsafe extern "C" fn() -> *mut Box<dyn Unit>;

/// Compiles shared libraries by loading them.
pub struct DynamicCompiler {
    shadow_dir: PathBuf,
    libraries: Mutex<Vec<libloading::Library>>,
}

impl std::fmt::Debug for DynamicCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicCompiler")
            .field("shadow_dir", &self.shadow_dir)
            .field("loaded_count", &self.libraries.lock().len())
            .finish()
    }
}

impl DynamicCompiler {
    /// Creates a compiler copying libraries into `shadow_dir`.
    pub fn new(shadow_dir: impl Into<PathBuf>) -> Self {
        Self {
            shadow_dir: shadow_dir.into(),
            libraries: Mutex::new(Vec::new()),
        }
    }

    fn shadow_copy(&self, path: &Path) -> Result<PathBuf, Diagnostic> {
        std::fs::create_dir_all(&self.shadow_dir).map_err(|e| {
            Diagnostic::error("io", format!("Failed to create '{}': {e}", self.shadow_dir.display()))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unit".to_string());
        let shadow = self.shadow_dir.join(format!("{}-{file_name}", Uuid::new_v4()));
        std::fs::copy(path, &shadow).map_err(|e| {
            Diagnostic::error("io", format!("Failed to shadow-copy '{}': {e}", path.display()))
        })?;
        Ok(shadow)
    }
}

impl UnitCompiler for DynamicCompiler {
    fn compile(&self, source: &SourceUnit) -> Result<CompiledSource, Vec<Diagnostic>> {
        let shadow = self.shadow_copy(&source.path).map_err(|d| vec![d])?;

        // SAFETY: loading runs the library's initialisers; only trusted
        // unit libraries belong in the watched directory.
        let library = unsafe { libloading::Library::new(&shadow) }.map_err(|e| {
            vec![Diagnostic::error(
                "library-load",
                format!("Failed to load '{}': {e}", source.path.display()),
            )]
        })?;

        // SAFETY: the symbol type is fixed by the unit ABI.
        let raw = unsafe {
            let create = library.get::<CreateUnitFn>(CREATE_SYMBOL).map_err(|e| {
                vec![Diagnostic::error(
                    "missing-symbol",
                    format!("'{}' does not export hookhost_create_unit: {e}", source.path.display()),
                )]
            })?;
            create()
        };

        if raw.is_null() {
            return Err(vec![Diagnostic::error(
                "library-load",
                "hookhost_create_unit returned null",
            )]);
        }

        // SAFETY: the pointer came from Box::into_raw in the library.
        let unit: Box<dyn Unit> = *unsafe { Box::from_raw(raw) };
        let unit: Arc<dyn Unit> = Arc::from(unit);

        info!(
            path = %source.path.display(),
            shadow = %shadow.display(),
            unit = %unit.info().name,
            "Dynamic unit loaded"
        );

        self.libraries.lock().push(library);

        Ok(CompiledSource {
            package: source.stem(),
            units: vec![unit],
        })
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext == "so" || ext == "dll" || ext == "dylib")
    }
}
