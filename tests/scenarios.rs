//! End-to-end scenarios exercising the safe engine directly, the way a
//! compiled program would drive it through the upcall surface.

use rand::SeedableRng;
use rand_isaac::IsaacRng;
use rostrt::comm::channel::Channel;
use rostrt::comm::port::Port;
use rostrt::domain::Domain;
use rostrt::service::LibcService;
use rostrt::task::{RendezvousDest, TaskState};
use std::cell::RefCell;
use std::rc::Rc;

fn new_domain() -> Domain {
    Domain::new(Box::new(LibcService::new()), 1)
}

fn recv_u32(dom: &mut Domain, consumer: &rostrt::task::TaskHandle, port: &Rc<RefCell<Port>>) -> u32 {
    let mut out = [0u8; 4];
    dom.recv(
        consumer,
        port,
        RendezvousDest {
            ptr: out.as_mut_ptr(),
            len: 4,
        },
    );
    u32::from_le_bytes(out)
}

/// S1: a single producer sends 0..999 on one channel, a single consumer
/// receives 1000 times. Order is preserved and the channel ends empty.
#[test]
fn single_producer_single_consumer_round_trip() {
    let mut dom = new_domain();
    let consumer = dom.new_task(None);
    dom.start_task(&consumer, 0);
    let producer = dom.new_task(None);
    dom.start_task(&producer, 0);

    let port = Rc::new(RefCell::new(Port::new(Rc::downgrade(&consumer), 4)));
    let chan = Channel::new(Rc::downgrade(&producer), &port);

    let mut received = Vec::with_capacity(1000);
    for i in 0u32..1000 {
        dom.send(&producer, &chan, &i.to_le_bytes()).unwrap();
        received.push(recv_u32(&mut dom, &consumer, &port));
    }

    assert!(received.into_iter().eq(0u32..1000));
    assert!(chan.borrow().buffer.is_empty());

    dom.exit_task(&producer, false);
    dom.exit_task(&consumer, false);
    assert_eq!(dom.rval, 0);
}

/// S2: two producers share one port over two channels. Both get a fair
/// share of the rendezvous slot, per-channel order survives interleaving,
/// and no writer token is left registered once both are drained.
#[test]
fn two_producers_one_consumer_share_a_port() {
    let mut dom = new_domain();
    let consumer = dom.new_task(None);
    dom.start_task(&consumer, 0);
    let p1 = dom.new_task(None);
    dom.start_task(&p1, 0);
    let p2 = dom.new_task(None);
    dom.start_task(&p2, 0);

    let port = Rc::new(RefCell::new(Port::new(Rc::downgrade(&consumer), 1)));
    let chan_a = Channel::new(Rc::downgrade(&p1), &port);
    let chan_b = Channel::new(Rc::downgrade(&p2), &port);

    for _ in 0..500 {
        dom.send(&p1, &chan_a, b"A").unwrap();
        dom.send(&p2, &chan_b, b"B").unwrap();
    }

    let mut count_a = 0;
    let mut count_b = 0;
    let mut from_a = Vec::new();
    let mut from_b = Vec::new();
    for _ in 0..1000 {
        let mut out = [0u8; 1];
        dom.recv(
            &consumer,
            &port,
            RendezvousDest {
                ptr: out.as_mut_ptr(),
                len: 1,
            },
        );
        match out[0] {
            b'A' => {
                count_a += 1;
                from_a.push(count_a);
            }
            b'B' => {
                count_b += 1;
                from_b.push(count_b);
            }
            other => panic!("unexpected unit {:?}", other),
        }
        if port.borrow().writers.is_empty() {
            break;
        }
    }

    assert_eq!(count_a, 500);
    assert_eq!(count_b, 500);
    assert!(from_a.windows(2).all(|w| w[0] < w[1]));
    assert!(from_b.windows(2).all(|w| w[0] < w[1]));
    assert!(port.borrow().writers.is_empty());
}

/// S3: T joins C; T wakes exactly once once C dies, and C is reaped only
/// after T drops its own reference.
#[test]
fn join_wakes_once_and_reaps_after_release() {
    let mut dom = new_domain();
    let t = dom.new_task(None);
    dom.start_task(&t, 0);
    let c = dom.new_task(None);
    dom.start_task(&c, 0);

    assert!(c.borrow().wait_queue.is_empty());
    let outcome = dom.join(&t, &c);
    assert_eq!(outcome, rostrt::comm::Suspend::Yielded);
    assert_eq!(t.borrow().state, TaskState::Blocked);
    assert_eq!(c.borrow().wait_queue.len(), 1);

    dom.exit_task(&c, false);
    assert_eq!(c.borrow().state, TaskState::Dead);
    assert_eq!(t.borrow().state, TaskState::Running);
    assert!(c.borrow().wait_queue.is_empty());

    drop(c);
    dom.reap_dead_tasks();
    assert_eq!(dom.dead_count(), 0);
}

/// S4: killing a task moves it straight to dead and leaves the killer
/// running, with no joiners to notify.
#[test]
fn kill_transitions_target_to_dead_immediately() {
    let mut dom = new_domain();
    let t = dom.new_task(None);
    dom.start_task(&t, 0);
    let c = dom.new_task(None);
    dom.start_task(&c, 0);

    dom.kill(&c);
    assert_eq!(c.borrow().state, TaskState::Dead);
    assert_eq!(t.borrow().state, TaskState::Running);
    assert_eq!(dom.dead_count(), 1);
}

/// S5: a channel survives its port's destruction; a subsequent send is a
/// silent no-op rather than a dangling-pointer panic, and the channel's own
/// drop later succeeds without touching the gone port.
#[test]
fn channel_survives_port_destruction() {
    let mut dom = new_domain();
    let t = dom.new_task(None);
    dom.start_task(&t, 0);
    let u = dom.new_task(None);
    dom.start_task(&u, 0);

    let port = Rc::new(RefCell::new(Port::new(Rc::downgrade(&t), 4)));
    let chan = Channel::new(Rc::downgrade(&u), &port);
    assert!(chan.borrow().port().is_some());

    drop(port);
    assert!(chan.borrow().port().is_none());

    let outcome = dom.send(&u, &chan, &1u32.to_le_bytes()).unwrap();
    assert_eq!(outcome, rostrt::comm::Suspend::StillRunning);

    drop(chan); // must not panic
}

/// Sanity check that the writer-fairness RNG path used by `recv` is at
/// least deterministic under a fixed seed, independent of the scenarios
/// above (which don't depend on draw order since each port has one writer
/// at a time by the point `recv` is called).
#[test]
fn recv_is_deterministic_under_a_fixed_seed() {
    let mut rng_a = IsaacRng::seed_from_u64(7);
    let mut rng_b = IsaacRng::seed_from_u64(7);
    use rand::RngCore;
    assert_eq!(rng_a.next_u64(), rng_b.next_u64());
}
