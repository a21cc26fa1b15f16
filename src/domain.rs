//! The domain and its scheduler (L8, §4.8): one domain maps 1:1 to an OS
//! thread, owns every task/port/channel/cache reachable from it, and picks
//! the next task to run uniformly at random from whichever are runnable.

use crate::circbuf::CircBufFull;
use crate::comm::{self, Suspend};
use crate::comm::channel::Channel;
use crate::comm::port::Port;
use crate::crate_cache::CrateCache;
use crate::crate_image::RostCrate;
use crate::log::{LogCategory, Logger};
use crate::rost_log;
use crate::service::Service;
use crate::task::{Alarm, RendezvousDest, TaskHandle, TaskInner, TaskState};
use rand::{RngCore, SeedableRng};
use rand_isaac::IsaacRng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::mpsc;

/// A message delivered across the one boundary domains are allowed to
/// communicate through (§5). Transport between domains is always by value:
/// the payload is an owned copy of whatever unit the sender pushed, sized
/// by the target channel's `unit_sz`.
pub struct IncomingMsg {
    pub payload: Vec<u8>,
}

fn vector_for(state: TaskState) -> VectorTag {
    match state {
        TaskState::Running => VectorTag::Running,
        TaskState::Blocked => VectorTag::Blocked,
        TaskState::Dead => VectorTag::Dead,
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum VectorTag {
    Running,
    Blocked,
    Dead,
}

pub struct Domain {
    pub log: Logger,
    pub service: Box<dyn Service>,
    running: Vec<TaskHandle>,
    blocked: Vec<TaskHandle>,
    dead: Vec<TaskHandle>,
    root_task: Option<TaskHandle>,
    rng: IsaacRng,
    interrupt_flag: bool,
    /// `(domain, crate)` identity: one cache per distinct crate image this
    /// domain has touched, keyed by the image's address.
    caches: HashMap<usize, Rc<RefCell<CrateCache>>>,
    pub rval: i32,
    incoming_tx: mpsc::Sender<IncomingMsg>,
    incoming_rx: mpsc::Receiver<IncomingMsg>,
    dom_tag: usize,
}

impl Domain {
    pub fn new(service: Box<dyn Service>, dom_tag: usize) -> Domain {
        let (tx, rx) = mpsc::channel();
        Domain {
            log: Logger::new(dom_tag),
            service,
            running: Vec::new(),
            blocked: Vec::new(),
            dead: Vec::new(),
            root_task: None,
            rng: seed_rng(),
            interrupt_flag: false,
            caches: HashMap::new(),
            rval: 0,
            incoming_tx: tx,
            incoming_rx: rx,
            dom_tag,
        }
    }

    pub fn incoming_sender(&self) -> mpsc::Sender<IncomingMsg> {
        self.incoming_tx.clone()
    }

    pub fn set_interrupt(&mut self) {
        self.interrupt_flag = true;
    }

    pub fn take_interrupt(&mut self) -> bool {
        std::mem::replace(&mut self.interrupt_flag, false)
    }

    fn vector_mut(&mut self, tag: VectorTag) -> &mut Vec<TaskHandle> {
        match tag {
            VectorTag::Running => &mut self.running,
            VectorTag::Blocked => &mut self.blocked,
            VectorTag::Dead => &mut self.dead,
        }
    }

    fn push_to(&mut self, tag: VectorTag, task: TaskHandle) {
        let vec = self.vector_mut(tag);
        let idx = vec.len();
        task.borrow_mut().idx = idx;
        vec.push(task);
    }

    fn remove_at(&mut self, tag: VectorTag, idx: usize) {
        let vec = self.vector_mut(tag);
        if idx >= vec.len() {
            return;
        }
        vec.swap_remove(idx);
        if let Some(moved) = vec.get(idx) {
            moved.borrow_mut().idx = idx;
        }
    }

    /// Moves `task` into whichever vector matches its current `state`, if
    /// it isn't there already. `prior` is the state the task had *before*
    /// whatever call (`block`, `wakeup`, `enter_dead`...) may have changed
    /// it — needed because the task's stored `idx` still refers to its
    /// position in the vector for `prior` until this runs.
    fn reconcile(&mut self, task: &TaskHandle, prior: TaskState) {
        let (current, idx) = {
            let t = task.borrow();
            (t.state, t.idx)
        };
        if current == prior {
            return;
        }
        self.remove_at(vector_for(prior), idx);
        self.push_to(vector_for(current), task.clone());
    }

    /// Creates a new task (§4.9 `new_task`), blocked on its own start per
    /// §3, and inserted into the blocked vector.
    pub fn new_task(&mut self, parent: Option<&TaskHandle>) -> TaskHandle {
        let parent_weak = parent.map(Rc::downgrade);
        let task = Rc::new(RefCell::new(TaskInner::new(parent_weak)));
        self.push_to(VectorTag::Blocked, task.clone());
        if self.root_task.is_none() {
            self.root_task = Some(task.clone());
        }
        rost_log!(self.log, LogCategory::TASK, "new task 0x{:x}", Rc::as_ptr(&task) as usize);
        task
    }

    /// `start_task` (§4.9): allocates the initial stack segment and wakes
    /// the task into `running`.
    pub fn start_task(&mut self, task: &TaskHandle, exit_task_glue: usize) {
        task.borrow_mut().stack.start(exit_task_glue);
        let prior = task.borrow().state;
        task.borrow_mut().state = TaskState::Running;
        self.reconcile(task, prior);
        rost_log!(self.log, LogCategory::TASK, "start task 0x{:x}", Rc::as_ptr(task) as usize);
    }

    pub fn sched(&mut self) -> Option<TaskHandle> {
        if self.running.is_empty() {
            return None;
        }
        let i = (self.rng.next_u64() as usize) % self.running.len();
        Some(self.running[i].clone())
    }

    /// Drains the dead vector of tasks with no other owner (refcount 1:
    /// only this vector's own `Rc` remains) — the root task is exempt, it
    /// is reaped only as part of domain teardown.
    pub fn reap_dead_tasks(&mut self) {
        let root_ptr = self.root_task.as_ref().map(Rc::as_ptr);
        let mut i = 0;
        while i < self.dead.len() {
            let is_root = root_ptr == Some(Rc::as_ptr(&self.dead[i]));
            if !is_root && Rc::strong_count(&self.dead[i]) == 1 {
                self.dead.swap_remove(i);
                if let Some(moved) = self.dead.get(i) {
                    moved.borrow_mut().idx = i;
                }
            } else {
                i += 1;
            }
        }
    }

    /// `kill` (§4.6/§4.9): transitions `target` straight to `dead` and
    /// flushes its wait queue, waking every joiner.
    pub fn kill(&mut self, target: &TaskHandle) {
        let prior = target.borrow().state;
        if prior == TaskState::Dead {
            return;
        }
        target.borrow_mut().enter_dead();
        self.reconcile(target, prior);
        self.notify_waiting_tasks(target);
    }

    /// `exit`/self-`die` (§4.6): same destination as `kill`, driven by the
    /// task itself rather than another task.
    pub fn exit_task(&mut self, task: &TaskHandle, failed: bool) {
        self.kill(task);
        if failed && self.root_task.as_ref().map_or(false, |r| Rc::ptr_eq(r, task)) {
            self.rval = 1;
        }
    }

    fn notify_waiting_tasks(&mut self, dead_task: &TaskHandle) {
        let alarms = std::mem::take(&mut dead_task.borrow_mut().wait_queue);
        let task_cond = crate::condition::Condition::task(dead_task);
        for alarm in alarms {
            if let Some(receiver) = alarm.receiver.upgrade() {
                let prior = receiver.borrow().state;
                if receiver.borrow().blocked_on(&task_cond) {
                    receiver.borrow_mut().wakeup(&task_cond);
                    self.reconcile(&receiver, prior);
                }
            }
        }
    }

    /// `join` (§4.9 `upcall_join`): blocks `caller` on `target` unless it
    /// is already dead.
    pub fn join(&mut self, caller: &TaskHandle, target: &TaskHandle) -> Suspend {
        if target.borrow().state == TaskState::Dead {
            return Suspend::StillRunning;
        }
        let idx = target.borrow().wait_queue.len();
        target.borrow_mut().wait_queue.push(Alarm {
            receiver: Rc::downgrade(caller),
            idx,
        });
        let prior = caller.borrow().state;
        caller.borrow_mut().block(crate::condition::Condition::task(target));
        self.reconcile(caller, prior);
        Suspend::Yielded
    }

    pub fn send(
        &mut self,
        caller: &TaskHandle,
        chan: &Rc<RefCell<Channel>>,
        unit: &[u8],
    ) -> Result<Suspend, CircBufFull> {
        let recv_task = chan.borrow().port().and_then(|p| p.borrow().owner.upgrade());
        let caller_prior = caller.borrow().state;
        let recv_prior = recv_task.as_ref().map(|t| t.borrow().state);

        let outcome = comm::send(&self.log, caller, chan, unit)?;

        self.reconcile(caller, caller_prior);
        if let (Some(recv_task), Some(recv_prior)) = (recv_task, recv_prior) {
            self.reconcile(&recv_task, recv_prior);
        }
        Ok(outcome)
    }

    pub fn recv(
        &mut self,
        caller: &TaskHandle,
        port: &Rc<RefCell<Port>>,
        dest: RendezvousDest,
    ) -> Suspend {
        let writers_snapshot: Vec<Weak<RefCell<Channel>>> = port.borrow().writers.clone();
        let sender_priors: Vec<_> = writers_snapshot
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|c| c.borrow().owner.upgrade())
            .map(|t| (t.clone(), t.borrow().state))
            .collect();
        let caller_prior = caller.borrow().state;

        let outcome = comm::recv(&self.log, caller, port, dest, &mut self.rng);

        self.reconcile(caller, caller_prior);
        for (sender, prior) in sender_priors {
            self.reconcile(&sender, prior);
        }
        outcome
    }

    /// `domain.get_cache(crate)` (§4.5): finds-or-creates the cache for a
    /// crate image, keyed by the image's address.
    pub fn get_cache(&mut self, crate_image: *const RostCrate) -> Rc<RefCell<CrateCache>> {
        let key = crate_image as usize;
        self.caches
            .entry(key)
            .or_insert_with(|| Rc::new(RefCell::new(CrateCache::new(crate_image))))
            .clone()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }

    pub fn try_recv_incoming(&self) -> Option<IncomingMsg> {
        self.incoming_rx.try_recv().ok()
    }

    /// The domain's main loop (§4.8), five steps repeated until nothing is
    /// left to run: reap dead tasks, pick one to activate, activate it,
    /// (the root-task-failed check is folded into `exit_task`, which is the
    /// only path that can set `rval`), then loop. `activate` stands in for
    /// `root_crate.activate_glue(task)` — there is no compiled root crate in
    /// this corpus to hand control to, so the caller supplies whatever
    /// cooperative step a scheduled task should take.
    pub fn main_loop<F>(&mut self, mut activate: F)
    where
        F: FnMut(&mut Domain, &TaskHandle),
    {
        loop {
            self.reap_dead_tasks();
            match self.sched() {
                Some(task) => activate(self, &task),
                None => {
                    if self.running.is_empty() && self.blocked.is_empty() {
                        break;
                    }
                    // Nothing runnable locally but tasks remain blocked:
                    // drain at most one cross-thread message before trying
                    // again, the same way a blocked domain waits on its
                    // `incoming` queue rather than spinning on nothing.
                    self.take_interrupt();
                    self.try_recv_incoming();
                }
            }
        }
    }

    /// `new_thread` (§4.9 task-lifecycle group): spawns a fresh domain on
    /// its own named OS thread, cloning the service so the child doesn't
    /// share the parent's allocator/log state, and hands the caller a
    /// sender it can use to post `IncomingMsg`s into the child's `incoming`
    /// queue. The child's own `main_loop` is the caller's responsibility —
    /// this only does the domain/thread setup rost_dom.cpp's `new_thread`
    /// upcall covers.
    pub fn spawn_child_domain<F>(&self, dom_tag: usize, body: F) -> (std::thread::JoinHandle<()>, mpsc::Sender<IncomingMsg>)
    where
        F: FnOnce(Domain) + Send + 'static,
    {
        let child = Domain::new(self.service.clone_service(), dom_tag);
        let sender = child.incoming_sender();
        let handle = std::thread::Builder::new()
            .name(format!("rost-domain-{}", dom_tag))
            .spawn(move || body(child))
            .expect("failed to spawn domain thread");
        (handle, sender)
    }
}

fn seed_rng() -> IsaacRng {
    use rand::RngCore as _;
    if let Some(seed) = crate::flags::Flags::get().rng_seed {
        return IsaacRng::seed_from_u64(seed);
    }
    let mut seed = <IsaacRng as SeedableRng>::Seed::default();
    if read_urandom(&mut seed).is_err() {
        // Entropy source unavailable (e.g. a sandboxed test environment):
        // fall back to the thread-local RNG rather than failing domain
        // construction outright.
        rand::thread_rng().fill_bytes(&mut seed);
    }
    IsaacRng::from_seed(seed)
}

#[cfg(unix)]
fn read_urandom(seed: &mut [u8]) -> nix::Result<()> {
    use nix::fcntl::OFlag;
    use nix::sys::stat::Mode;
    use nix::unistd::{close, read};
    let fd = nix::fcntl::open("/dev/urandom", OFlag::O_RDONLY, Mode::empty())?;
    let mut filled = 0;
    while filled < seed.len() {
        let n = read(fd, &mut seed[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    close(fd)?;
    Ok(())
}

#[cfg(not(unix))]
fn read_urandom(_seed: &mut [u8]) -> Result<(), ()> {
    Err(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::LibcService;

    fn new_domain() -> Domain {
        Domain::new(Box::new(LibcService::new()), 0xd0)
    }

    #[test]
    fn new_task_starts_in_blocked_vector() {
        let mut dom = new_domain();
        let t = dom.new_task(None);
        assert_eq!(dom.blocked_count(), 1);
        assert_eq!(t.borrow().idx, 0);
    }

    #[test]
    fn start_task_moves_it_to_running() {
        let mut dom = new_domain();
        let t = dom.new_task(None);
        dom.start_task(&t, 0);
        assert_eq!(dom.blocked_count(), 0);
        assert_eq!(dom.running_count(), 1);
    }

    #[test]
    fn sched_returns_none_when_nothing_runnable() {
        let mut dom = new_domain();
        assert!(dom.sched().is_none());
    }

    #[test]
    fn kill_moves_task_to_dead_and_wakes_joiner() {
        let mut dom = new_domain();
        let child = dom.new_task(None);
        dom.start_task(&child, 0);
        let parent = dom.new_task(None);
        dom.start_task(&parent, 0);

        let outcome = dom.join(&parent, &child);
        assert_eq!(outcome, Suspend::Yielded);
        assert_eq!(parent.borrow().state, TaskState::Blocked);

        dom.kill(&child);
        assert_eq!(child.borrow().state, TaskState::Dead);
        assert_eq!(parent.borrow().state, TaskState::Running);
        assert_eq!(dom.dead_count(), 1);
    }

    #[test]
    fn reap_dead_tasks_skips_root_and_referenced_tasks() {
        let mut dom = new_domain();
        let root = dom.new_task(None);
        dom.start_task(&root, 0);
        let extra = dom.new_task(None);
        dom.start_task(&extra, 0);
        let keep_alive = extra.clone();
        dom.kill(&root);
        dom.kill(&extra);
        drop(extra);
        dom.reap_dead_tasks();
        // `root` is exempt, `extra` is still referenced by `keep_alive`.
        assert_eq!(dom.dead_count(), 2);
        drop(keep_alive);
        dom.reap_dead_tasks();
        assert_eq!(dom.dead_count(), 1);
    }

    #[test]
    fn main_loop_runs_until_the_sole_task_exits() {
        let mut dom = new_domain();
        let t = dom.new_task(None);
        dom.start_task(&t, 0);

        let mut ticks = 0;
        dom.main_loop(|dom, task| {
            ticks += 1;
            if ticks == 5 {
                dom.exit_task(task, false);
            }
        });

        assert_eq!(ticks, 5);
        assert_eq!(dom.running_count(), 0);
        assert_eq!(dom.blocked_count(), 0);
        // `t` is this domain's sole (and therefore root) task, exempt from
        // reaping until domain teardown.
        assert_eq!(dom.dead_count(), 1);
    }

    #[test]
    fn main_loop_sets_rval_when_the_root_task_fails() {
        let mut dom = new_domain();
        let root = dom.new_task(None);
        dom.start_task(&root, 0);

        dom.main_loop(|dom, task| {
            dom.exit_task(task, true);
        });

        assert_eq!(dom.rval, 1);
    }

    #[test]
    fn main_loop_exits_immediately_with_no_tasks() {
        let mut dom = new_domain();
        let mut ticks = 0;
        dom.main_loop(|_, _| ticks += 1);
        assert_eq!(ticks, 0);
    }
}
