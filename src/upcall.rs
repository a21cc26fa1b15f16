//! The upcall ABI (L9, §4.9, §6): the `extern "C"` surface compiled code
//! actually calls. Every function here is a thin shim — it reconstructs
//! safe handles from the raw pointers the ABI hands it, logs entry exactly
//! like `LOG_UPCALL_ENTRY` did in the original, and immediately delegates
//! to the safe engine in `domain`/`comm`/`task`. None of this module's
//! logic is unit-tested directly (there is no real compiler in this corpus
//! to drive it); the engine it calls into is tested thoroughly instead.

use crate::comm::channel::Channel;
use crate::comm::port::Port;
use crate::comm::Suspend;
use crate::domain::Domain;
use crate::error::FailCode;
use crate::log::LogCategory;
use crate::rost_log;
use crate::rost_mem::{self, RostBuf};
use crate::task::{RendezvousDest, TaskHandle, TaskInner};
use std::cell::RefCell;
use std::os::raw::{c_char, c_void};
use std::rc::Rc;

/// What every upcall actually receives as "the caller task": enough to
/// reach both the task and the domain that owns it, mirroring how the
/// original read `task->dom` off the task pointer itself.
#[repr(C)]
pub struct TaskCtx {
    pub domain: *mut Domain,
    pub task: *const RefCell<TaskInner>,
}

/// Reconstructs an owned handle from a raw `Rc` pointer without taking
/// over its lifetime — the real owner is whatever domain vector the task
/// lives in. Mirrors the `Rc::into_raw`/`from_raw` pairing used at the one
/// place this runtime crosses an FFI boundary.
unsafe fn borrow_rc<T>(ptr: *const T) -> Rc<T> {
    let rc = Rc::from_raw(ptr);
    let cloned = Rc::clone(&rc);
    std::mem::forget(rc);
    cloned
}

unsafe fn ctx(raw: *const TaskCtx) -> (&'static mut Domain, TaskHandle) {
    let c = &*raw;
    (&mut *c.domain, borrow_rc(c.task))
}

fn fail(dom: &mut Domain, task: &TaskHandle, code: FailCode) {
    rost_log!(
        dom.log,
        LogCategory::UPCALL | LogCategory::ERR,
        "task failing with code {}",
        code.code()
    );
    dom.exit_task(task, true);
}

#[no_mangle]
pub unsafe extern "C" fn upcall_malloc(raw: *const TaskCtx, size: usize) -> *mut u8 {
    let (dom, _task) = ctx(raw);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::MEM, "upcall malloc({})", size);
    dom.service.malloc(size)
}

#[no_mangle]
pub unsafe extern "C" fn upcall_free(raw: *const TaskCtx, ptr: *mut u8, size: usize) {
    let (dom, _task) = ctx(raw);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::MEM, "upcall free(0x{:x})", ptr as usize);
    dom.service.free(ptr, size);
}

#[no_mangle]
pub unsafe extern "C" fn upcall_new_str(
    raw: *const TaskCtx,
    data: *const u8,
    len: usize,
) -> *const RefCell<RostBuf> {
    let (dom, task) = ctx(raw);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::MEM, "upcall new_str(len={})", len);
    let bytes = std::slice::from_raw_parts(data, len);
    match rost_mem::new_str(dom.service.as_ref(), bytes) {
        Ok(buf) => Rc::into_raw(buf),
        Err(code) => {
            fail(dom, &task, code);
            std::ptr::null()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn upcall_new_vec(
    raw: *const TaskCtx,
    fill_hint: usize,
) -> *const RefCell<RostBuf> {
    let (dom, task) = ctx(raw);
    rost_log!(
        dom.log,
        LogCategory::UPCALL | LogCategory::MEM,
        "upcall new_vec(fill_hint={})",
        fill_hint
    );
    match rost_mem::new_vec(dom.service.as_ref(), fill_hint) {
        Ok(buf) => Rc::into_raw(buf),
        Err(code) => {
            fail(dom, &task, code);
            std::ptr::null()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn upcall_vec_grow(
    raw: *const TaskCtx,
    v: *const RefCell<RostBuf>,
    n_bytes: usize,
) -> *const RefCell<RostBuf> {
    let (dom, task) = ctx(raw);
    let v = borrow_rc(v);
    rost_log!(
        dom.log,
        LogCategory::UPCALL | LogCategory::MEM,
        "upcall vec_grow(n_bytes={})",
        n_bytes
    );
    match rost_mem::vec_grow(dom.service.as_ref(), &v, n_bytes) {
        Ok(grown) => Rc::into_raw(grown),
        Err(code) => {
            fail(dom, &task, code);
            std::ptr::null()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn upcall_yield(raw: *const TaskCtx) {
    let (dom, task) = ctx(raw);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::COMM, "upcall yield()");
    // A bare yield never changes state; the scheduler simply doesn't pick
    // this task again until its next turn comes up at random.
    let _ = &task;
}

#[no_mangle]
pub unsafe extern "C" fn upcall_join(raw: *const TaskCtx, other: *const RefCell<TaskInner>) {
    let (dom, task) = ctx(raw);
    let other = borrow_rc(other);
    rost_log!(
        dom.log,
        LogCategory::UPCALL | LogCategory::COMM,
        "upcall join(other=0x{:x})",
        Rc::as_ptr(&other) as usize
    );
    dom.join(&task, &other);
}

#[no_mangle]
pub unsafe extern "C" fn upcall_new_task(raw: *const TaskCtx) -> *const RefCell<TaskInner> {
    let (dom, task) = ctx(raw);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::TASK, "upcall new_task()");
    let child = dom.new_task(Some(&task));
    Rc::into_raw(child)
}

#[no_mangle]
pub unsafe extern "C" fn upcall_start_task(
    raw: *const TaskCtx,
    target: *const RefCell<TaskInner>,
    exit_task_glue: usize,
) {
    let (dom, _task) = ctx(raw);
    let target = borrow_rc(target);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::TASK, "upcall start_task()");
    dom.start_task(&target, exit_task_glue);
}

#[no_mangle]
pub unsafe extern "C" fn upcall_exit(raw: *const TaskCtx) {
    let (dom, task) = ctx(raw);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::TASK, "upcall exit()");
    dom.exit_task(&task, false);
}

#[no_mangle]
pub unsafe extern "C" fn upcall_kill(raw: *const TaskCtx, target: *const RefCell<TaskInner>) {
    let (dom, _task) = ctx(raw);
    let target = borrow_rc(target);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::TASK, "upcall kill()");
    dom.kill(&target);
}

#[no_mangle]
pub unsafe extern "C" fn upcall_fail(
    raw: *const TaskCtx,
    expr: *const c_char,
    file: *const c_char,
    line: usize,
) {
    let (dom, task) = ctx(raw);
    let expr = std::ffi::CStr::from_ptr(expr).to_string_lossy();
    let file = std::ffi::CStr::from_ptr(file).to_string_lossy();
    rost_log!(
        dom.log,
        LogCategory::UPCALL | LogCategory::ERR,
        "upcall fail '{}', {}:{}",
        expr,
        file,
        line
    );
    fail(dom, &task, FailCode::UserAssert);
}

#[no_mangle]
pub unsafe extern "C" fn upcall_new_port(raw: *const TaskCtx, unit_sz: usize) -> *const RefCell<Port> {
    let (dom, task) = ctx(raw);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::COMM, "upcall new_port(unit_sz={})", unit_sz);
    let port = Rc::new(RefCell::new(Port::new(Rc::downgrade(&task), unit_sz)));
    Rc::into_raw(port)
}

#[no_mangle]
pub unsafe extern "C" fn upcall_del_port(_raw: *const TaskCtx, port: *const RefCell<Port>) {
    // Dropping the strong reference the compiler held runs `Port::drop`,
    // which disassociates any surviving channels (S5).
    drop(Rc::from_raw(port));
}

#[no_mangle]
pub unsafe extern "C" fn upcall_new_chan(
    raw: *const TaskCtx,
    port: *const RefCell<Port>,
) -> *const RefCell<Channel> {
    let (dom, task) = ctx(raw);
    let port = borrow_rc(port);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::COMM, "upcall new_chan()");
    let chan = Channel::new(Rc::downgrade(&task), &port);
    Rc::into_raw(chan)
}

#[no_mangle]
pub unsafe extern "C" fn upcall_clone_chan(
    raw: *const TaskCtx,
    owner: *const RefCell<TaskInner>,
    chan: *const RefCell<Channel>,
) -> *const RefCell<Channel> {
    let (dom, _task) = ctx(raw);
    let owner = borrow_rc(owner);
    let chan = borrow_rc(chan);
    rost_log!(dom.log, LogCategory::UPCALL | LogCategory::COMM, "upcall clone_chan()");
    match Channel::clone_for(&chan, Rc::downgrade(&owner)) {
        Some(clone) => Rc::into_raw(clone),
        None => std::ptr::null(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn upcall_del_chan(_raw: *const TaskCtx, chan: *const RefCell<Channel>) {
    drop(Rc::from_raw(chan));
}

#[no_mangle]
pub unsafe extern "C" fn upcall_send(
    raw: *const TaskCtx,
    chan: *const RefCell<Channel>,
    sptr: *const u8,
) {
    let (dom, task) = ctx(raw);
    let chan = borrow_rc(chan);
    rost_log!(
        dom.log,
        LogCategory::UPCALL | LogCategory::COMM,
        "upcall send(chan=0x{:x})",
        Rc::as_ptr(&chan) as usize
    );
    let unit_sz = chan.borrow().buffer.unit_sz();
    let unit = std::slice::from_raw_parts(sptr, unit_sz);
    match dom.send(&task, &chan, unit) {
        Ok(Suspend::Yielded) | Ok(Suspend::StillRunning) => {}
        Err(_) => fail(dom, &task, FailCode::ChanBufferFull),
    }
}

#[no_mangle]
pub unsafe extern "C" fn upcall_recv(
    raw: *const TaskCtx,
    dptr: *mut u8,
    port: *const RefCell<Port>,
) {
    let (dom, task) = ctx(raw);
    let port = borrow_rc(port);
    rost_log!(
        dom.log,
        LogCategory::UPCALL | LogCategory::COMM,
        "upcall recv(dptr=0x{:x})",
        dptr as usize
    );
    let unit_sz = port.borrow().unit_sz;
    let dest = RendezvousDest { ptr: dptr, len: unit_sz };
    dom.recv(&task, &port, dest);
}

/// `require_c_sym`/`require_rost_sym`/`get_type_desc` are intentionally
/// not wired up here: they need a live `CrateCache` reached through the
/// caller's `active_cache`, a dynamic loader, and (for inter-crate
/// symbols) a second crate's debug info — all of which only a real
/// compiled program would ever supply. `crate_cache::CrateCache` exposes
/// exactly those operations directly; see its tests for the behavior this
/// shim would otherwise forward.
#[no_mangle]
pub unsafe extern "C" fn upcall_unimplemented_symbol_resolution(_raw: *const TaskCtx) -> *mut c_void {
    std::ptr::null_mut()
}
