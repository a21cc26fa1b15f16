//! The send/receive rendezvous protocol (§4.7): ports, channels, tokens,
//! and the fair writer-pick that ties them together.

pub mod channel;
pub mod port;
pub mod token;

use crate::circbuf::CircBufFull;
use crate::condition::Condition;
use crate::log::{LogCategory, Logger};
use crate::rost_log;
use crate::task::{RendezvousDest, TaskInner, TaskState};
use channel::Channel;
use port::Port;
use rand::RngCore;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Whether an upcall that may suspend actually did.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Suspend {
    Yielded,
    StillRunning,
}

/// Attempts to move one unit from `src`'s buffer directly into `dst`'s
/// rendezvous slot. Returns whether a transmission happened. Mirrors
/// `attempt_transmission` in `rost_upcall.cpp` exactly: every early return
/// is a distinct, logged "transmission incomplete" case, not a failure.
pub fn attempt_transmission(
    log: &Logger,
    src: &Rc<RefCell<Channel>>,
    dst: &Rc<RefCell<TaskInner>>,
) -> bool {
    let port = match src.borrow().port() {
        Some(p) => p,
        None => {
            rost_log!(log, LogCategory::COMM, "src died, transmission incomplete");
            return false;
        }
    };
    if src.borrow().buffer.is_empty() {
        rost_log!(log, LogCategory::COMM, "buffer empty, transmission incomplete");
        return false;
    }
    let port_cond = Condition::port(&port);
    if !dst.borrow().blocked_on(&port_cond) {
        rost_log!(
            log,
            LogCategory::COMM,
            "dst in non-reading state, transmission incomplete"
        );
        return false;
    }

    let (dptr, len) = {
        let dst_ref = dst.borrow();
        let dest = dst_ref
            .dptr
            .as_ref()
            .expect("blocked_on(port) implies dptr is set");
        (dest.ptr, dest.len)
    };
    rost_log!(
        log,
        LogCategory::COMM,
        "receiving {} bytes, dptr=0x{:x}",
        len,
        dptr as usize
    );
    {
        let mut src_mut = src.borrow_mut();
        debug_assert_eq!(len, src_mut.buffer.unit_sz());
        let dst_slice = unsafe { std::slice::from_raw_parts_mut(dptr, len) };
        src_mut.buffer.shift(dst_slice);
    }

    // Wake the sender if it's waiting for this very send to land.
    if let Some(sender) = src.borrow().owner.upgrade() {
        let token_cond = Condition::token(src);
        if sender.borrow().blocked_on(&token_cond) {
            sender.borrow_mut().wakeup(&token_cond);
        }
    }

    dst.borrow_mut().wakeup(&port_cond);
    rost_log!(log, LogCategory::COMM, "transmission complete");
    true
}

/// `upcall_send` (§4.7). `owner_task_alive` resolution of a port whose
/// owning task has already exited is an Open Question (§9) this
/// implementation resolves by dropping the send silently: no unit is
/// enqueued, no token submitted, the sender never blocks. See DESIGN.md.
pub fn send(
    log: &Logger,
    caller: &Rc<RefCell<TaskInner>>,
    chan: &Rc<RefCell<Channel>>,
    unit: &[u8],
) -> Result<Suspend, CircBufFull> {
    let port = chan.borrow().port();
    let owner_alive = port
        .as_ref()
        .and_then(|p| p.borrow().owner.upgrade())
        .map_or(false, |t| t.borrow().state != TaskState::Dead);

    if !owner_alive {
        rost_log!(
            log,
            LogCategory::COMM | LogCategory::ERR,
            "port has no live task, dropping send"
        );
        return Ok(Suspend::StillRunning);
    }
    let port = port.unwrap();
    let recv_task = port.borrow().owner.upgrade().unwrap();

    chan.borrow_mut().buffer.push(unit)?;
    caller.borrow_mut().block(Condition::token(chan));
    attempt_transmission(log, chan, &recv_task);

    let unread = !chan.borrow().buffer.is_empty();
    let submitted = chan.borrow().token.submitted;
    if unread && !submitted {
        port.borrow_mut().submit_writer(chan);
    }

    if caller.borrow().state == TaskState::Blocked {
        Ok(Suspend::Yielded)
    } else {
        Ok(Suspend::StillRunning)
    }
}

/// `upcall_recv` (§4.7). Unlike the literal original, `caller`'s
/// rendezvous slot is populated *before* any synchronous transmission
/// attempt rather than after — the original reads the stale slot from the
/// task's previous cycle at that point, which is very likely an oversight
/// (see DESIGN.md); setting it eagerly is the only reading under which
/// "deliver directly into the caller's destination" is actually true.
pub fn recv(
    log: &Logger,
    caller: &Rc<RefCell<TaskInner>>,
    port: &Rc<RefCell<Port>>,
    dest: RendezvousDest,
    rng: &mut dyn RngCore,
) -> Suspend {
    assert!(
        port.borrow()
            .owner
            .upgrade()
            .map_or(false, |o| Rc::ptr_eq(&o, caller)),
        "recv on a port not owned by the caller"
    );

    caller.borrow_mut().block(Condition::port(port));
    caller.borrow_mut().dptr = Some(dest);

    let writers_snapshot: Vec<Weak<RefCell<Channel>>> = port.borrow().writers.clone();
    if !writers_snapshot.is_empty() {
        let i = (rng.next_u64() as usize) % writers_snapshot.len();
        if let Some(chosen) = writers_snapshot[i].upgrade() {
            if attempt_transmission(log, &chosen, caller) {
                let (idx, submitted) = {
                    let c = chosen.borrow();
                    (c.token.idx, c.token.submitted)
                };
                port.borrow_mut().withdraw_token_at(idx, submitted);
                chosen.borrow_mut().token.submitted = false;
            }
        }
    } else {
        rost_log!(log, LogCategory::COMM, "no writers sending to port");
    }

    if caller.borrow().state == TaskState::Blocked {
        Suspend::Yielded
    } else {
        caller.borrow_mut().dptr = None;
        Suspend::StillRunning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use rand::SeedableRng;
    use rand_isaac::IsaacRng;

    fn new_task(dom_tag: usize) -> (Rc<RefCell<TaskInner>>, Logger) {
        let task = Rc::new(RefCell::new(TaskInner::new(None)));
        task.borrow_mut().state = TaskState::Running;
        (task, Logger::new(dom_tag))
    }

    #[test]
    fn send_then_recv_round_trips_one_unit() {
        let (receiver, log) = new_task(1);
        let (sender, _) = new_task(2);
        let port = Rc::new(RefCell::new(Port::new(Rc::downgrade(&receiver), 4)));
        let chan = Channel::new(Rc::downgrade(&sender), &port);

        let outcome = send(&log, &sender, &chan, &42u32.to_le_bytes()).unwrap();
        assert_eq!(outcome, Suspend::Yielded);
        assert!(!chan.borrow().buffer.is_empty());

        let mut out = [0u8; 4];
        let mut rng = IsaacRng::seed_from_u64(1);
        let outcome = recv(
            &log,
            &receiver,
            &port,
            RendezvousDest {
                ptr: out.as_mut_ptr(),
                len: 4,
            },
            &mut rng,
        );
        assert_eq!(outcome, Suspend::StillRunning);
        assert_eq!(u32::from_le_bytes(out), 42);
        assert_eq!(sender.borrow().state, TaskState::Running);
        assert!(chan.borrow().buffer.is_empty());
    }

    #[test]
    fn recv_with_no_writers_blocks() {
        let (receiver, log) = new_task(1);
        let port = Rc::new(RefCell::new(Port::new(Rc::downgrade(&receiver), 4)));
        let mut out = [0u8; 4];
        let mut rng = IsaacRng::seed_from_u64(1);
        let outcome = recv(
            &log,
            &receiver,
            &port,
            RendezvousDest {
                ptr: out.as_mut_ptr(),
                len: 4,
            },
            &mut rng,
        );
        assert_eq!(outcome, Suspend::Yielded);
        assert_eq!(receiver.borrow().state, TaskState::Blocked);
    }

    #[test]
    fn send_to_port_with_dead_owner_is_dropped_silently() {
        let (owner, log) = new_task(1);
        owner.borrow_mut().state = TaskState::Dead;
        let (sender, _) = new_task(2);
        let port = Rc::new(RefCell::new(Port::new(Rc::downgrade(&owner), 4)));
        let chan = Channel::new(Rc::downgrade(&sender), &port);

        let outcome = send(&log, &sender, &chan, &1u32.to_le_bytes()).unwrap();
        assert_eq!(outcome, Suspend::StillRunning);
        assert!(chan.borrow().buffer.is_empty());
        assert_eq!(sender.borrow().state, TaskState::Running);
    }

    #[test]
    fn send_after_port_disassociated_is_a_no_op() {
        let (receiver, log) = new_task(1);
        let (sender, _) = new_task(2);
        let port = Rc::new(RefCell::new(Port::new(Rc::downgrade(&receiver), 4)));
        let chan = Channel::new(Rc::downgrade(&sender), &port);
        drop(port);
        assert!(chan.borrow().port().is_none());

        let outcome = send(&log, &sender, &chan, &1u32.to_le_bytes());
        // No live port to address: dropped silently, same as a dead owner.
        assert!(matches!(outcome, Ok(Suspend::StillRunning)));
    }
}
