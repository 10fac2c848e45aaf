//! Shared library discovery
//!
//! Derives a library path from a reference binary: read its `DT_NEEDED`
//! entries, pick the soname of the wanted family, and resolve that soname
//! through the dynamic linker cache or the standard library directories.

use goblin::elf::Elf;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tlscap_core::backend::{ConfigError, ConfigResult};
use tracing::debug;

/// Library directories searched when the linker cache has no entry
pub static LIBRARY_DIRS: &[&str] = &[
    "/lib64",
    "/usr/lib64",
    "/lib",
    "/usr/lib",
    "/lib/x86_64-linux-gnu",
    "/usr/lib/x86_64-linux-gnu",
    "/lib/aarch64-linux-gnu",
    "/usr/lib/aarch64-linux-gnu",
];

/// How many levels of `DT_NEEDED` to follow from the reference binary
const MAX_NEEDED_DEPTH: usize = 2;

/// Section the Go linker emits into every module-aware binary
const GO_BUILDINFO_SECTION: &str = ".go.buildinfo";

fn parse_elf<'a>(path: &Path, bytes: &'a [u8]) -> ConfigResult<Elf<'a>> {
    Elf::parse(bytes).map_err(|e| ConfigError::Elf {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// `DT_NEEDED` entries of an ELF file
pub fn needed_libraries(path: &Path) -> ConfigResult<Vec<String>> {
    let bytes = std::fs::read(path)?;
    let elf = parse_elf(path, &bytes)?;
    Ok(elf.libraries.iter().map(|lib| lib.to_string()).collect())
}

/// Whether `soname` belongs to the family named by `prefix` (e.g. `libssl.so`)
pub fn soname_matches(soname: &str, prefix: &str) -> bool {
    soname == prefix
        || soname
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Parse `ldconfig -p` output into `(soname, path)` pairs.
///
/// Lines look like `\tlibssl.so.3 (libc6,x86-64) => /usr/lib/x86_64-linux-gnu/libssl.so.3`.
pub fn parse_ldconfig(output: &str) -> Vec<(String, PathBuf)> {
    output
        .lines()
        .filter_map(|line| {
            let (lhs, path) = line.split_once("=>")?;
            let soname = lhs.split_whitespace().next()?;
            let path = path.trim();
            if path.is_empty() {
                return None;
            }
            Some((soname.to_string(), PathBuf::from(path)))
        })
        .collect()
}

/// Entries of the dynamic linker cache (empty if `ldconfig` is unavailable)
pub fn ldconfig_cache() -> Vec<(String, PathBuf)> {
    match Command::new("ldconfig").arg("-p").output() {
        Ok(output) if output.status.success() => {
            parse_ldconfig(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            debug!("ldconfig -p exited with {}", output.status);
            Vec::new()
        }
        Err(e) => {
            debug!("Failed to run ldconfig -p: {}", e);
            Vec::new()
        }
    }
}

/// Resolves sonames to paths
#[derive(Debug, Clone, Default)]
pub struct LibraryLocator {
    cache: Vec<(String, PathBuf)>,
    dirs: Vec<PathBuf>,
}

impl LibraryLocator {
    /// Locator backed by the host linker cache and the standard directories
    pub fn host() -> Self {
        Self {
            cache: ldconfig_cache(),
            dirs: LIBRARY_DIRS.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn with_entries(cache: Vec<(String, PathBuf)>, dirs: Vec<PathBuf>) -> Self {
        Self { cache, dirs }
    }

    /// First existing path for an exact soname
    pub fn locate(&self, soname: &str) -> Option<PathBuf> {
        self.cache
            .iter()
            .filter(|(name, _)| name == soname)
            .map(|(_, path)| path.clone())
            .chain(self.dirs.iter().map(|dir| dir.join(soname)))
            .find(|path| path.is_file())
    }

    /// Derive the path of the `prefix` library family from a reference binary,
    /// following `DT_NEEDED` through intermediate libraries.
    pub fn derive_from_binary(&self, binary: &Path, prefix: &str) -> Option<PathBuf> {
        let mut visited = HashSet::new();
        let mut frontier = vec![binary.to_path_buf()];

        for _ in 0..MAX_NEEDED_DEPTH {
            let mut next = Vec::new();
            for object in frontier {
                if !visited.insert(object.clone()) {
                    continue;
                }
                let needed = match needed_libraries(&object) {
                    Ok(needed) => needed,
                    Err(e) => {
                        debug!("Skipping {}: {}", object.display(), e);
                        continue;
                    }
                };
                if let Some(soname) = needed.iter().find(|lib| soname_matches(lib, prefix)) {
                    match self.locate(soname) {
                        Some(path) => {
                            debug!("{} needs {} at {}", object.display(), soname, path.display());
                            return Some(path);
                        }
                        None => debug!("{} needs {} but it cannot be located", object.display(), soname),
                    }
                }
                next.extend(needed.iter().filter_map(|lib| self.locate(lib)));
            }
            frontier = next;
        }

        None
    }
}

/// Whether the file is an ELF carrying Go build information
pub fn is_go_binary(path: &Path) -> ConfigResult<bool> {
    let bytes = std::fs::read(path)?;
    let elf = parse_elf(path, &bytes)?;
    Ok(elf
        .section_headers
        .iter()
        .any(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(GO_BUILDINFO_SECTION)))
}
