//! The host `service` facade (§4.1, §6): the thin boundary between the
//! runtime core and whatever process actually hosts it. Everything the
//! domain needs from the outside world — raw allocation, a place to put
//! log lines, a way to die fatally, and a way to clone itself for a new
//! domain thread — goes through this trait.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr;

/// Collaborator the domain never constructs a concrete type for directly;
/// `Domain::new` takes a `Box<dyn Service>` so tests can swap in a fake
/// that records calls instead of touching the real allocator.
pub trait Service: Send {
    fn malloc(&self, size: usize) -> *mut u8;
    fn realloc(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8;
    fn free(&self, ptr: *mut u8, size: usize);
    fn log(&self, message: &str);
    fn fatal(&self, expr: &str, file: &str, line: u32) -> !;
    fn clone_service(&self) -> Box<dyn Service>;
}

/// Default host service: allocates through libc's `malloc`/`realloc`/`free`
/// rather than Rust's global allocator, keeping a clean separation between
/// "memory the runtime doles out to tasks" and "memory the Rust code
/// implementing the runtime itself uses" — the same split `rost_dom`'s
/// `malloc`/`free` wrappers draw around the host `service`.
pub struct LibcService;

impl LibcService {
    pub fn new() -> LibcService {
        LibcService
    }
}

impl Default for LibcService {
    fn default() -> Self {
        LibcService::new()
    }
}

impl Service for LibcService {
    fn malloc(&self, size: usize) -> *mut u8 {
        unsafe { libc::malloc(size) as *mut u8 }
    }

    fn realloc(&self, ptr: *mut u8, _old_size: usize, new_size: usize) -> *mut u8 {
        unsafe { libc::realloc(ptr as *mut libc::c_void, new_size) as *mut u8 }
    }

    fn free(&self, ptr: *mut u8, _size: usize) {
        unsafe { libc::free(ptr as *mut libc::c_void) }
    }

    fn log(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn fatal(&self, expr: &str, file: &str, line: u32) -> ! {
        eprintln!("rostrt: fatal assertion failed: {} at {}:{}", expr, file, line);
        std::process::abort();
    }

    fn clone_service(&self) -> Box<dyn Service> {
        Box::new(LibcService::new())
    }
}

/// A `Service` used by tests: routes allocation through Rust's own
/// allocator (so Miri/ASan-style tooling can see it) and collects log
/// lines instead of printing them, and panics instead of aborting on a
/// fatal assert so test harnesses can catch it.
#[cfg(test)]
pub struct TestService {
    pub logged: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl TestService {
    pub fn new() -> TestService {
        TestService {
            logged: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl Service for TestService {
    fn malloc(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        let layout = Layout::from_size_align(size, 8).unwrap();
        unsafe { System.alloc(layout) }
    }

    fn realloc(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.malloc(new_size);
        }
        let layout = Layout::from_size_align(old_size.max(1), 8).unwrap();
        unsafe { System.realloc(ptr, layout, new_size) }
    }

    fn free(&self, ptr: *mut u8, size: usize) {
        if ptr.is_null() || size == 0 {
            return;
        }
        let layout = Layout::from_size_align(size, 8).unwrap();
        unsafe { System.dealloc(ptr, layout) }
    }

    fn log(&self, message: &str) {
        self.logged.lock().unwrap().push(message.to_string());
    }

    fn fatal(&self, expr: &str, file: &str, line: u32) -> ! {
        panic!("fatal assertion failed: {} at {}:{}", expr, file, line);
    }

    fn clone_service(&self) -> Box<dyn Service> {
        Box::new(TestService::new())
    }
}
