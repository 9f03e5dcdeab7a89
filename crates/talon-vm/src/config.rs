//! Runtime configuration. The reference implementation takes its handful
//! of start-up knobs from environment variables read once; this crate
//! exposes the same small set of knobs as explicit struct fields instead,
//! since nothing in the teacher's stack (or this one) pulls in a
//! config-file-parsing crate for the core engine — `toml` stays reserved
//! for the excluded compiler/build-manifest layer (spec.md §1's scope).

use std::path::PathBuf;
use talon_core::heap::HashSeed;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bytes reserved for each semispace at start-up; the heap grows this
    /// on demand after a scavenge (`talon_core::heap::Heap::collect`).
    pub initial_semispace_bytes: usize,
    /// Upper bound on a single frame's value stack before a
    /// `RecursionError`-equivalent fatal condition is raised.
    pub max_stack_depth: usize,
    /// How object identity hashes are seeded (spec.md §9 open question,
    /// resolved in DESIGN.md).
    pub hash_seed: HashSeed,
    /// Directory bytecode cache entries are read from and written to.
    pub cache_root: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            initial_semispace_bytes: 4 * 1024 * 1024,
            max_stack_depth: 1000,
            hash_seed: HashSeed::OsEntropy,
            cache_root: default_cache_root(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    std::env::var_os("TALON_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("talon-bytecode-cache"))
}

impl RuntimeConfig {
    /// A configuration with a fixed hash seed, used by tests that need
    /// reproducible identity hashes.
    pub fn deterministic_for_tests(seed: u64) -> Self {
        RuntimeConfig {
            hash_seed: HashSeed::Fixed(seed),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_os_entropy_seed() {
        let config = RuntimeConfig::default();
        assert!(matches!(config.hash_seed, HashSeed::OsEntropy));
    }

    #[test]
    fn deterministic_config_uses_fixed_seed() {
        let config = RuntimeConfig::deterministic_for_tests(7);
        assert!(matches!(config.hash_seed, HashSeed::Fixed(7)));
    }
}
