//! Refcounted heap buffers backing the Memory upcall group's `new_str`,
//! `new_vec`, and `vec_grow` (§4.9). The original's `rost_str`/`rost_vec`
//! share one allocation shape — a header plus a flat byte run — and differ
//! only in whether the initial fill is copied in from a caller buffer;
//! `RostBuf` models that shared shape directly rather than as two structs.

use crate::error::FailCode;
use crate::service::Service;
use std::cell::RefCell;
use std::rc::Rc;

pub type RostBufHandle = Rc<RefCell<RostBuf>>;

/// Host-allocated, refcounted byte buffer. `alloc`/`fill`/`ptr` mirror
/// `rost_vec`'s fields directly; `Rc`'s strong count stands in for the
/// original's intrusive `refcnt` — `vec_grow`'s copy-vs-realloc choice reads
/// `Rc::strong_count` exactly where the original reads `v->refcnt`.
pub struct RostBuf {
    alloc: usize,
    fill: usize,
    ptr: *mut u8,
    service: Box<dyn Service>,
}

impl RostBuf {
    pub fn fill(&self) -> usize {
        self.fill
    }

    pub fn alloc(&self) -> usize {
        self.alloc
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.fill) }
    }
}

impl Drop for RostBuf {
    fn drop(&mut self) {
        self.service.free(self.ptr, self.alloc);
    }
}

fn rounded(requested: usize) -> usize {
    requested.max(1).next_power_of_two()
}

/// `upcall_new_str` (§4.9): host-allocates a buffer sized to hold `s` and
/// copies it in. Fails with `StringAlloc` if the host allocator returns
/// null, matching `upcall_new_str`'s null check in the original runtime.
pub fn new_str(service: &dyn Service, s: &[u8]) -> Result<RostBufHandle, FailCode> {
    let alloc = rounded(s.len());
    let raw = service.malloc(alloc);
    if raw.is_null() {
        return Err(FailCode::StringAlloc);
    }
    unsafe { std::ptr::copy_nonoverlapping(s.as_ptr(), raw, s.len()) };
    Ok(Rc::new(RefCell::new(RostBuf {
        alloc,
        fill: s.len(),
        ptr: raw,
        service: service.clone_service(),
    })))
}

/// `upcall_new_vec` (§4.9): host-allocates an empty buffer with room for at
/// least `fill_hint` bytes, writing nothing into it yet.
pub fn new_vec(service: &dyn Service, fill_hint: usize) -> Result<RostBufHandle, FailCode> {
    let alloc = rounded(fill_hint);
    let raw = service.malloc(alloc);
    if raw.is_null() {
        return Err(FailCode::StringAlloc);
    }
    Ok(Rc::new(RefCell::new(RostBuf {
        alloc,
        fill: 0,
        ptr: raw,
        service: service.clone_service(),
    })))
}

/// `upcall_vec_grow` (§4.9): the three-path decision exactly as
/// `rost_upcall.cpp`'s `upcall_vec_grow` makes it:
/// - no growth needed: the current allocation already covers `fill + n_bytes`.
/// - in-place realloc: this handle is the only reference (`refcnt == 1`).
/// - copy-on-grow: otherwise, a fresh buffer is allocated, the old contents
///   copied in, and the old handle is left for its own `Drop` to free.
///
/// Fails with `GrowthAlloc` if the host allocator returns null on either
/// the realloc or the copy path.
pub fn vec_grow(
    service: &dyn Service,
    v: &RostBufHandle,
    n_bytes: usize,
) -> Result<RostBufHandle, FailCode> {
    let needed = rounded(v.borrow().fill + n_bytes);

    if Rc::strong_count(v) == 1 {
        if v.borrow().alloc >= needed {
            return Ok(v.clone());
        }
        let mut buf = v.borrow_mut();
        let new_ptr = service.realloc(buf.ptr, buf.alloc, needed);
        if new_ptr.is_null() {
            return Err(FailCode::GrowthAlloc);
        }
        buf.ptr = new_ptr;
        buf.alloc = needed;
        drop(buf);
        return Ok(v.clone());
    }

    let raw = service.malloc(needed);
    if raw.is_null() {
        return Err(FailCode::GrowthAlloc);
    }
    let fill = {
        let src = v.borrow();
        unsafe { std::ptr::copy_nonoverlapping(src.ptr, raw, src.fill) };
        src.fill
    };
    Ok(Rc::new(RefCell::new(RostBuf {
        alloc: needed,
        fill,
        ptr: raw,
        service: service.clone_service(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::TestService;

    #[test]
    fn new_str_copies_the_initial_bytes() {
        let service = TestService::new();
        let buf = new_str(&service, b"hello").unwrap();
        assert_eq!(buf.borrow().as_slice(), b"hello");
        assert_eq!(buf.borrow().fill(), 5);
    }

    #[test]
    fn new_vec_starts_empty_with_requested_capacity() {
        let service = TestService::new();
        let buf = new_vec(&service, 10).unwrap();
        assert_eq!(buf.borrow().fill(), 0);
        assert!(buf.borrow().alloc() >= 10);
    }

    #[test]
    fn vec_grow_no_growth_path_returns_same_handle_when_capacity_suffices() {
        let service = TestService::new();
        let buf = new_vec(&service, 64).unwrap();
        let grown = vec_grow(&service, &buf, 4).unwrap();
        assert!(Rc::ptr_eq(&buf, &grown));
        assert_eq!(grown.borrow().alloc(), buf.borrow().alloc());
    }

    #[test]
    fn vec_grow_realloc_path_grows_in_place_when_unshared() {
        let service = TestService::new();
        let buf = new_str(&service, b"ab").unwrap();
        let grown = vec_grow(&service, &buf, 1000).unwrap();
        assert!(Rc::ptr_eq(&buf, &grown));
        assert!(grown.borrow().alloc() >= 1002);
        assert_eq!(grown.borrow().as_slice(), b"ab");
    }

    #[test]
    fn vec_grow_copy_path_yields_a_new_handle_when_shared() {
        let service = TestService::new();
        let buf = new_str(&service, b"ab").unwrap();
        let _extra_ref = buf.clone();
        let grown = vec_grow(&service, &buf, 1000).unwrap();
        assert!(!Rc::ptr_eq(&buf, &grown));
        assert_eq!(grown.borrow().as_slice(), b"ab");
    }
}
