//! Shared-library symbol resolution.
//!
//! A [`SymbolSource`] holds the shared libraries a catalog's callables live
//! in and resolves their entry points by symbol name before the catalog is
//! frozen.

use std::path::Path;

use libloading::Library;

use crate::descriptor::Catalog;
use crate::error::Result;
use crate::logging::debug;

/// An ordered set of opened shared libraries.
#[derive(Default)]
pub struct SymbolSource {
    libs: Vec<Library>,
}

impl SymbolSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a shared library and add it to the lookup order.
    ///
    /// # Safety
    /// Loading a library runs its initialization code; the file must be a
    /// trusted shared object.
    pub unsafe fn open(&mut self, path: &Path) -> Result<()> {
        let lib = unsafe { Library::new(path) }?;
        debug!(path = %path.display(), "opened shared library");
        self.libs.push(lib);
        Ok(())
    }

    /// Resolve a symbol to its address, searching libraries in open order.
    pub fn resolve(&self, symbol: &str) -> Option<usize> {
        for lib in &self.libs {
            let sym: std::result::Result<libloading::Symbol<'_, unsafe extern "C" fn()>, _> =
                unsafe { lib.get(symbol.as_bytes()) };
            if let Ok(f) = sym {
                return Some(*f as usize);
            }
        }
        None
    }

    /// Resolve every catalog callable whose name matches an exported
    /// symbol, storing the address on its descriptor. Returns how many
    /// were resolved.
    pub fn resolve_catalog(&self, catalog: &mut Catalog) -> usize {
        let wanted: Vec<_> = catalog
            .callables()
            .filter(|(_, c)| c.address.is_none())
            .map(|(id, c)| (id, c.name.clone()))
            .collect();

        let mut resolved = 0;
        for (id, name) in wanted {
            if let Some(address) = self.resolve(&name) {
                if catalog.set_address(id, address) {
                    debug!(symbol = %name, address, "resolved callable");
                    resolved += 1;
                }
            }
        }
        resolved
    }
}
