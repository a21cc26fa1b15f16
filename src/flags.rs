//! Process-wide configuration (§6/§9 ambient stack), set once at startup
//! from the CLI and read everywhere else through [`Flags::get`] — the same
//! `lazy_static!`-backed singleton shape the original runtime used, just
//! holding the knobs this runtime actually has rather than a debugger's.

use std::sync::RwLock;

lazy_static::lazy_static! {
    static ref FLAGS: RwLock<Flags> = RwLock::new(Flags::default());
}

/// Everything the CLI bootstrap may override before the domain starts.
#[derive(Clone)]
pub struct Flags {
    /// Overrides `ROST_LOG` when set, rather than reading the environment.
    pub log_override: Option<String>,
    /// Forces ANSI coloring on/off, rather than keying off `ROST_COLOR_LOG`.
    pub color_override: Option<bool>,
    /// Deterministic PRNG seed, for reproducible scheduling in tests and
    /// demos — the default is to seed from OS entropy instead.
    pub rng_seed: Option<u64>,
    /// Path the dynamic loader searches in addition to the system default,
    /// e.g. for crates built alongside the runtime rather than installed.
    pub resource_path: Option<String>,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            log_override: None,
            color_override: None,
            rng_seed: None,
            resource_path: None,
        }
    }
}

impl Flags {
    pub fn get() -> Flags {
        FLAGS.read().unwrap().clone()
    }

    pub fn set(flags: Flags) {
        *FLAGS.write().unwrap() = flags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_have_no_overrides() {
        let f = Flags::default();
        assert!(f.log_override.is_none());
        assert!(f.rng_seed.is_none());
    }
}
