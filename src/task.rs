//! The task object and its state machine (§4.6). A `Task` is always held
//! as a `Rc<RefCell<TaskInner>>` — `Rc` gives us the refcounting §4.2 asks
//! for without an intrusive base, and back-edges (parent link, alarm
//! receivers) use `Weak` so a task never keeps another alive by being
//! blocked on it or waiting on it.

use crate::condition::Condition;
use crate::crate_cache::CrateCache;
use crate::stack::Stack;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub type TaskHandle = Rc<RefCell<TaskInner>>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    Running,
    Blocked,
    Dead,
}

/// Where a blocked `recv` wants its unit delivered. A raw pointer because
/// it names a location in the caller's own stack/heap, handed across the
/// upcall boundary — see `upcall::upcall_recv`.
pub struct RendezvousDest {
    pub ptr: *mut u8,
    pub len: usize,
}

/// `{receiver, idx}`: placed into a wait queue so its receiver is woken
/// when the queue is flushed (on the waited-for task's death). Holds the
/// receiver by `Weak` so a task waiting to join another doesn't keep that
/// other task's would-be joiner alive — breaking the exact task↔task
/// reference cycle §9 calls out.
pub struct Alarm {
    pub receiver: Weak<RefCell<TaskInner>>,
    pub idx: usize,
}

pub struct TaskInner {
    // Compiler-visible fields.
    pub stack: Stack,
    pub gc_alloc_chain: usize,
    pub active_cache: Option<Rc<RefCell<CrateCache>>>,

    // Runtime-only fields.
    pub state: TaskState,
    pub cond: Option<Condition>,
    pub idx: usize,
    pub dptr: Option<RendezvousDest>,
    pub parent: Option<Weak<RefCell<TaskInner>>>,
    pub wait_queue: Vec<Alarm>,
    pub name: String,
}

impl TaskInner {
    /// A freshly created task starts blocked on its own start, per §3:
    /// "state = blocked on start" — `Domain::start_task` is what wakes it
    /// into `running`.
    pub fn new(parent: Option<Weak<RefCell<TaskInner>>>) -> TaskInner {
        TaskInner {
            stack: Stack::new(),
            gc_alloc_chain: 0,
            active_cache: None,
            state: TaskState::Blocked,
            cond: None,
            idx: 0,
            dptr: None,
            parent,
            wait_queue: Vec::new(),
            name: String::new(),
        }
    }

    pub fn block(&mut self, cond: Condition) {
        assert_eq!(self.state, TaskState::Running, "block() on a non-running task");
        self.cond = Some(cond);
        self.state = TaskState::Blocked;
    }

    pub fn wakeup(&mut self, cond: &Condition) {
        assert!(
            self.blocked_on(cond),
            "wakeup() on a task not blocked on the given condition"
        );
        self.cond = None;
        self.state = TaskState::Running;
    }

    pub fn blocked_on(&self, cond: &Condition) -> bool {
        self.state == TaskState::Blocked
            && self.cond.as_ref().map_or(false, |c| c.same_as(cond))
    }

    /// Shared tail of `die`/`kill`: both land a task in `dead` the same
    /// way, leaving wait-queue flushing to the caller (it needs a handle
    /// to `self` to build `Condition::Task`, which this method doesn't
    /// have).
    pub fn enter_dead(&mut self) {
        self.state = TaskState::Dead;
        self.cond = None;
        self.stack.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::port::Port;

    fn running(parent: Option<Weak<RefCell<TaskInner>>>) -> TaskInner {
        let mut t = TaskInner::new(parent);
        t.state = TaskState::Running;
        t
    }

    #[test]
    fn new_task_starts_blocked() {
        let t = TaskInner::new(None);
        assert_eq!(t.state, TaskState::Blocked);
    }

    #[test]
    fn block_then_wakeup_round_trips() {
        let port = Rc::new(RefCell::new(Port::new(Weak::new(), 4)));
        let mut t = running(None);
        let cond = Condition::port(&port);
        t.block(cond.clone());
        assert_eq!(t.state, TaskState::Blocked);
        assert!(t.blocked_on(&cond));
        t.wakeup(&cond);
        assert_eq!(t.state, TaskState::Running);
        assert!(t.cond.is_none());
    }

    #[test]
    #[should_panic(expected = "block() on a non-running task")]
    fn block_asserts_running() {
        let mut t = TaskInner::new(None);
        let port = Rc::new(RefCell::new(Port::new(Weak::new(), 4)));
        t.block(Condition::port(&port));
    }

    #[test]
    #[should_panic(expected = "wakeup() on a task not blocked")]
    fn wakeup_asserts_blocked_on_matching_condition() {
        let port_a = Rc::new(RefCell::new(Port::new(Weak::new(), 4)));
        let port_b = Rc::new(RefCell::new(Port::new(Weak::new(), 4)));
        let mut t = running(None);
        t.block(Condition::port(&port_a));
        t.wakeup(&Condition::port(&port_b));
    }

    #[test]
    fn enter_dead_clears_condition_and_stack() {
        let mut t = running(None);
        t.stack.start(0);
        let port = Rc::new(RefCell::new(Port::new(Weak::new(), 4)));
        t.block(Condition::port(&port));
        t.enter_dead();
        assert_eq!(t.state, TaskState::Dead);
        assert!(t.cond.is_none());
        assert_eq!(t.stack.depth(), 0);
    }
}
