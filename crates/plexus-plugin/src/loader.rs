//! Dynamic plugin loading using `libloading` (feature-gated).
//!
//! A dynamic plugin is a `cdylib` exporting
//! `#[unsafe(no_mangle)] pub fn plexus_plugin_create() -> Box<dyn Plugin>`.
//! The Rust ABI is used, so the library must be built with the same compiler
//! and `plexus-plugin` version as the host.

use std::path::Path;
use std::sync::Arc;

use plexus_core::error::AppError;
use plexus_core::result::AppResult;

use crate::catalog::PluginFactory;
use crate::traits::Plugin;

/// Symbol every dynamic plugin exports.
pub const CREATE_SYMBOL: &[u8] = b"plexus_plugin_create";

/// Signature of [`CREATE_SYMBOL`].
pub type CreatePluginFn = fn() -> Box<dyn Plugin>;

/// Open a plugin library and wrap its constructor as a factory.
///
/// The library stays loaded for as long as the factory is alive.
///
/// # Safety
/// Loads and runs arbitrary code. Only load trusted plugins.
pub unsafe fn load_factory(path: &Path) -> AppResult<PluginFactory> {
    let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
        AppError::plugin(format!(
            "Failed to load plugin library '{}': {e}",
            path.display()
        ))
    })?;

    let create: CreatePluginFn = unsafe {
        let symbol = library.get::<CreatePluginFn>(CREATE_SYMBOL).map_err(|e| {
            AppError::plugin(format!(
                "Plugin library '{}' has no setup entry point: {e}",
                path.display()
            ))
        })?;
        *symbol
    };

    let library = Arc::new(library);
    Ok(Arc::new(move || -> Arc<dyn Plugin> {
        let _loaded = &library;
        Arc::from(create())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::error::ErrorKind;

    #[test]
    fn test_missing_library_is_plugin_error() {
        let err = unsafe { load_factory(Path::new("/nonexistent/libplugin.so")) }
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Plugin);
    }
}
