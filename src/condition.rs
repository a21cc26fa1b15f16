//! The `Condition` abstraction (§3, §9): anything a task may block on. The
//! original represented this as an empty base class (`rost_cond`) and used
//! pointer identity at runtime to tell a port from a token from a task;
//! here it's a tagged variant, per the redesign note in §9, carrying
//! non-owning `Weak` references so a condition never keeps its target
//! alive.

use crate::comm::channel::Channel;
use crate::comm::port::Port;
use crate::task::TaskInner;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

#[derive(Clone)]
pub enum Condition {
    Port(Weak<RefCell<Port>>),
    /// A channel's embedded writer token. The token itself isn't separately
    /// refcounted (§3), so the condition names the channel that owns it.
    Token(Weak<RefCell<Channel>>),
    Task(Weak<RefCell<TaskInner>>),
}

impl Condition {
    pub fn port(p: &Rc<RefCell<Port>>) -> Condition {
        Condition::Port(Rc::downgrade(p))
    }

    pub fn token(c: &Rc<RefCell<Channel>>) -> Condition {
        Condition::Token(Rc::downgrade(c))
    }

    pub fn task(t: &Rc<RefCell<TaskInner>>) -> Condition {
        Condition::Task(Rc::downgrade(t))
    }

    /// Whether two conditions name the same object. A condition whose
    /// target has already been dropped never compares equal to anything,
    /// including a fresh condition over the same (now-dangling) weak.
    pub fn same_as(&self, other: &Condition) -> bool {
        match (self, other) {
            (Condition::Port(a), Condition::Port(b)) => weak_ptr_eq(a, b),
            (Condition::Token(a), Condition::Token(b)) => weak_ptr_eq(a, b),
            (Condition::Task(a), Condition::Task(b)) => weak_ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn is_port(&self, p: &Rc<RefCell<Port>>) -> bool {
        matches!(self, Condition::Port(w) if weak_eq_rc(w, p))
    }

    pub fn is_token(&self, c: &Rc<RefCell<Channel>>) -> bool {
        matches!(self, Condition::Token(w) if weak_eq_rc(w, c))
    }

    pub fn is_task(&self, t: &Rc<RefCell<TaskInner>>) -> bool {
        matches!(self, Condition::Task(w) if weak_eq_rc(w, t))
    }
}

fn weak_ptr_eq<T>(a: &Weak<T>, b: &Weak<T>) -> bool {
    match (a.upgrade(), b.upgrade()) {
        (Some(a), Some(b)) => Rc::ptr_eq(&a, &b),
        _ => false,
    }
}

fn weak_eq_rc<T>(w: &Weak<T>, rc: &Rc<T>) -> bool {
    match w.upgrade() {
        Some(strong) => Rc::ptr_eq(&strong, rc),
        None => false,
    }
}
