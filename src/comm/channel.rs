//! Channel: a task-owned write endpoint addressing a port (§3, §4.7). The
//! reference to the port is `Weak` — never owning — per the redesign note
//! in §9: a channel must be able to observe its port disappearing (S5)
//! without that port being kept alive just because a channel still points
//! at it.

use super::port::Port;
use super::token::Token;
use crate::circbuf::CircBuf;
use crate::task::TaskInner;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub struct Channel {
    pub owner: Weak<RefCell<TaskInner>>,
    pub port: Option<Weak<RefCell<Port>>>,
    pub buffer: CircBuf,
    pub token: Token,
    /// Index into `port.chans`, valid only while `port` is `Some`.
    pub idx_in_chans: usize,
}

impl Channel {
    pub fn new(
        owner: Weak<RefCell<TaskInner>>,
        port: &Rc<RefCell<Port>>,
    ) -> Rc<RefCell<Channel>> {
        let unit_sz = port.borrow().unit_sz;
        let chan = Rc::new(RefCell::new(Channel {
            owner,
            port: Some(Rc::downgrade(port)),
            buffer: CircBuf::new(unit_sz),
            token: Token::new(),
            idx_in_chans: 0,
        }));
        port.borrow_mut().register_channel(&chan);
        chan
    }

    /// Clones this channel for another owning task, addressing the same
    /// port (§4.7 `upcall_clone_chan`): permits multiple producers.
    pub fn clone_for(this: &Rc<RefCell<Channel>>, new_owner: Weak<RefCell<TaskInner>>) -> Option<Rc<RefCell<Channel>>> {
        let port = this.borrow().port()?;
        Some(Channel::new(new_owner, &port))
    }

    pub fn port(&self) -> Option<Rc<RefCell<Port>>> {
        self.port.as_ref().and_then(Weak::upgrade)
    }

    /// Called by `Port::drop`: nulls the back-pointer so a subsequent
    /// `send` observes "no port" rather than a dangling reference.
    pub fn disassociate_port(&mut self) {
        self.port = None;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(port_rc) = self.port() {
            let mut port = port_rc.borrow_mut();
            port.withdraw_token_at(self.token.idx, self.token.submitted);
            port.remove_channel_at(self.idx_in_chans);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::port::Port;

    #[test]
    fn dropping_channel_withdraws_token_and_chans_entry() {
        let port = Rc::new(RefCell::new(Port::new(Weak::new(), 4)));
        let chan = Channel::new(Weak::new(), &port);
        port.borrow_mut().submit_writer(&chan);
        assert_eq!(port.borrow().writers.len(), 1);
        assert_eq!(port.borrow().chans.len(), 1);
        drop(chan);
        assert_eq!(port.borrow().writers.len(), 0);
        assert_eq!(port.borrow().chans.len(), 0);
    }

    #[test]
    fn disassociated_channel_drop_does_not_touch_port() {
        let port = Rc::new(RefCell::new(Port::new(Weak::new(), 4)));
        let chan = Channel::new(Weak::new(), &port);
        drop(port);
        assert!(chan.borrow().port().is_none());
        drop(chan); // must not panic despite the port being gone
    }

    #[test]
    fn clone_for_shares_the_same_port() {
        let port = Rc::new(RefCell::new(Port::new(Weak::new(), 4)));
        let a = Channel::new(Weak::new(), &port);
        let b = Channel::clone_for(&a, Weak::new()).unwrap();
        assert!(Rc::ptr_eq(&a.borrow().port().unwrap(), &b.borrow().port().unwrap()));
        assert_eq!(port.borrow().chans.len(), 2);
    }
}
