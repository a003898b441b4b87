//! Filesystem module loader
//!
//! The default resolver behind `import`: tries the specifier relative to
//! the importing module, then each search path, appending `.js` when the
//! specifier has no extension. Sandboxed VMs never see this loader.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use skink_vm_core::module_registry::{ModuleLoaderFn, ModuleSource};

/// Resolves specifiers against the filesystem
pub struct FsModuleLoader {
    search_paths: Vec<PathBuf>,
}

impl FsModuleLoader {
    /// Loader with the given search path list
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// The resolver callback for `Vm::set_module_loader`
    pub fn into_loader(self) -> ModuleLoaderFn {
        Arc::new(move |specifier, base| self.resolve(specifier, base))
    }

    fn resolve(&self, specifier: &str, base: &str) -> Option<ModuleSource> {
        let mut candidates = Vec::new();

        let relative = specifier.starts_with("./") || specifier.starts_with("../");
        if relative || Path::new(specifier).is_absolute() {
            let base_dir = Path::new(base).parent().unwrap_or_else(|| Path::new("."));
            candidates.push(base_dir.join(specifier));
        } else {
            for search in &self.search_paths {
                candidates.push(search.join(specifier));
            }
        }

        for mut candidate in candidates {
            if candidate.extension().is_none() {
                candidate.set_extension("js");
            }
            match std::fs::read_to_string(&candidate) {
                Ok(source) => {
                    tracing::debug!(specifier, path = %candidate.display(), "resolved module");
                    return Some(ModuleSource {
                        source,
                        path: candidate.to_string_lossy().into_owned(),
                    });
                }
                Err(_) => continue,
            }
        }
        tracing::debug!(specifier, base, "module resolution declined");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_relative() {
        let dir = tempfile::tempdir().unwrap();
        let module_path = dir.path().join("dep.js");
        let mut file = std::fs::File::create(&module_path).unwrap();
        writeln!(file, "export default 42;").unwrap();

        let loader = FsModuleLoader::new(Vec::new());
        let base = dir.path().join("main.js");
        let source = loader
            .resolve("./dep", base.to_str().unwrap())
            .expect("resolved");
        assert!(source.source.contains("42"));
        assert!(source.path.ends_with("dep.js"));
    }

    #[test]
    fn test_resolve_from_search_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.js"), "export default 1;").unwrap();

        let loader = FsModuleLoader::new(vec![dir.path().to_path_buf()]);
        assert!(loader.resolve("lib", "main.js").is_some());
        assert!(loader.resolve("missing", "main.js").is_none());
    }
}
