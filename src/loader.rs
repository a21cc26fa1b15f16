//! Dynamic library loader facade (§4.5/§6): the runtime's only window onto
//! `dlopen`/`dlsym` (or the platform equivalent), kept behind a trait so the
//! cache can be exercised with a fake loader in tests.

use std::collections::HashMap;
use std::sync::Mutex;

pub trait Loader: Send {
    /// Opens a shared library by name, returning an opaque handle.
    fn open(&self, name: &str) -> Result<usize, String>;
    /// Resolves a C symbol within a previously-opened library.
    fn sym(&self, handle: usize, name: &str) -> Option<usize>;
    fn close(&self, handle: usize);
}

/// Default loader, backed by `libloading`'s `dlopen`/`dlsym` wrapper. We
/// keep the `libloading::Library` objects alive in a side table keyed by
/// the handle we hand back, since `crate_cache::Lib` only wants a plain
/// `usize` to store (mirroring the original's bare `uintptr_t handle`).
pub struct DlLoader {
    libs: Mutex<HashMap<usize, libloading::Library>>,
    next_handle: Mutex<usize>,
}

impl DlLoader {
    pub fn new() -> DlLoader {
        DlLoader {
            libs: Mutex::new(HashMap::new()),
            next_handle: Mutex::new(1),
        }
    }
}

impl Default for DlLoader {
    fn default() -> Self {
        DlLoader::new()
    }
}

impl Loader for DlLoader {
    fn open(&self, name: &str) -> Result<usize, String> {
        let lib = unsafe { libloading::Library::new(name) }.map_err(|e| e.to_string())?;
        let mut next = self.next_handle.lock().unwrap();
        let handle = *next;
        *next += 1;
        self.libs.lock().unwrap().insert(handle, lib);
        Ok(handle)
    }

    fn sym(&self, handle: usize, name: &str) -> Option<usize> {
        let libs = self.libs.lock().unwrap();
        let lib = libs.get(&handle)?;
        let cname = format!("{}\0", name);
        unsafe {
            lib.get::<*const ()>(cname.as_bytes())
                .ok()
                .map(|sym| *sym as usize)
        }
    }

    fn close(&self, handle: usize) {
        self.libs.lock().unwrap().remove(&handle);
    }
}

/// In-memory loader for tests: libraries are just named bags of symbols
/// registered ahead of time, so cache-resolution tests don't need a real
/// `.so` on disk.
#[cfg(test)]
pub struct FakeLoader {
    libs: Mutex<HashMap<usize, HashMap<String, usize>>>,
    by_name: Mutex<HashMap<String, usize>>,
    next_handle: Mutex<usize>,
}

#[cfg(test)]
impl FakeLoader {
    pub fn new() -> FakeLoader {
        FakeLoader {
            libs: Mutex::new(HashMap::new()),
            by_name: Mutex::new(HashMap::new()),
            next_handle: Mutex::new(1),
        }
    }

    pub fn register_lib(&self, name: &str, syms: HashMap<String, usize>) {
        let mut next = self.next_handle.lock().unwrap();
        let handle = *next;
        *next += 1;
        self.libs.lock().unwrap().insert(handle, syms);
        self.by_name.lock().unwrap().insert(name.to_string(), handle);
    }
}

#[cfg(test)]
impl Loader for FakeLoader {
    fn open(&self, name: &str) -> Result<usize, String> {
        self.by_name
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| format!("no such library: {}", name))
    }

    fn sym(&self, handle: usize, name: &str) -> Option<usize> {
        self.libs.lock().unwrap().get(&handle)?.get(name).copied()
    }

    fn close(&self, _handle: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_loader_resolves_registered_symbols() {
        let loader = FakeLoader::new();
        let mut syms = HashMap::new();
        syms.insert("foo".to_string(), 0xdead_beef);
        loader.register_lib("libfoo.so", syms);

        let handle = loader.open("libfoo.so").unwrap();
        assert_eq!(loader.sym(handle, "foo"), Some(0xdead_beef));
        assert_eq!(loader.sym(handle, "bar"), None);
    }

    #[test]
    fn fake_loader_rejects_unknown_library() {
        let loader = FakeLoader::new();
        assert!(loader.open("nope.so").is_err());
    }
}
