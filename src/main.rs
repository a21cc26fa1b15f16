//! CLI bootstrap. Real deployments hand this binary a compiler-emitted
//! root crate to activate; no such crate exists in this corpus, so the
//! default run drives a small producer/consumer demo directly over the
//! safe engine and reports what it saw, the way `TraceInfoCommand` reports
//! a trace header — by serializing a summary struct to JSON.

use rostrt::comm::Suspend;
use rostrt::domain::Domain;
use rostrt::flags::Flags;
use rostrt::service::LibcService;
use rostrt::task::RendezvousDest;
use serde::Serialize;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "rostrt", about = "small cooperative task-runtime demo host")]
struct Opts {
    /// Overrides ROST_LOG, e.g. "comm,task".
    #[structopt(long)]
    log: Option<String>,

    /// Forces ANSI color on/off regardless of ROST_COLOR_LOG.
    #[structopt(long)]
    color: Option<bool>,

    /// Deterministic PRNG seed, for a reproducible demo run.
    #[structopt(long)]
    seed: Option<u64>,

    /// Print a JSON summary of the demo run instead of human-readable text.
    #[structopt(long)]
    json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DemoSummary {
    units_sent: usize,
    units_received: usize,
    in_order: bool,
    domain_rval: i32,
}

fn main() {
    let opts = Opts::from_args();
    Flags::set(Flags {
        log_override: opts.log.clone(),
        color_override: opts.color,
        rng_seed: opts.seed,
        resource_path: None,
    });

    let summary = run_demo();
    if opts.json {
        println!("{}", serde_json::to_string(&summary).unwrap());
    } else {
        println!(
            "sent {} units, received {} units, in order: {}, rval: {}",
            summary.units_sent, summary.units_received, summary.in_order, summary.domain_rval
        );
    }

    std::process::exit(summary.domain_rval);
}

/// A single-producer/single-consumer round trip (the S1 scenario), driven
/// through `Domain::main_loop` since no compiled root crate exists here to
/// activate through the real glue entry points — the `activate` closure
/// below plays the part compiled task code would otherwise play: on each
/// turn it's scheduled, a task sends or receives exactly one unit, then
/// exits once its share of the work is done.
fn run_demo() -> DemoSummary {
    const N: u32 = 1000;

    let mut dom = Domain::new(Box::new(LibcService::new()), 0);
    let consumer = dom.new_task(None);
    dom.start_task(&consumer, 0);
    let producer = dom.new_task(None);
    dom.start_task(&producer, 0);

    let port = std::rc::Rc::new(std::cell::RefCell::new(
        rostrt::comm::port::Port::new(std::rc::Rc::downgrade(&consumer), 4),
    ));
    let chan = rostrt::comm::channel::Channel::new(std::rc::Rc::downgrade(&producer), &port);

    let mut next_send = 0u32;
    let mut received = Vec::with_capacity(N as usize);
    // Lives for the whole loop, not just one activation: a blocked `recv`
    // leaves `dptr` pointing at this buffer until some later `send` fills
    // it, which can happen turns after this closure call returns.
    let mut recv_buf = [0u8; 4];
    let mut awaiting_recv = false;

    dom.main_loop(|dom, task| {
        if std::rc::Rc::ptr_eq(task, &producer) {
            if next_send < N {
                let unit = next_send.to_le_bytes();
                let _ = dom.send(&producer, &chan, &unit);
                next_send += 1;
            }
            if next_send == N {
                dom.exit_task(&producer, false);
            }
        } else if std::rc::Rc::ptr_eq(task, &consumer) {
            if awaiting_recv {
                // Rescheduled after a prior blocked recv completed;
                // attempt_transmission already delivered into recv_buf.
                received.push(u32::from_le_bytes(recv_buf));
                awaiting_recv = false;
            } else if (received.len() as u32) < N {
                let outcome = dom.recv(
                    &consumer,
                    &port,
                    RendezvousDest {
                        ptr: recv_buf.as_mut_ptr(),
                        len: 4,
                    },
                );
                match outcome {
                    Suspend::StillRunning => received.push(u32::from_le_bytes(recv_buf)),
                    Suspend::Yielded => awaiting_recv = true,
                }
            }
            if (received.len() as u32) == N {
                dom.exit_task(&consumer, false);
            }
        }
    });

    let in_order = received.iter().copied().eq(0..N);
    DemoSummary {
        units_sent: N as usize,
        units_received: received.len(),
        in_order,
        domain_rval: dom.rval,
    }
}
