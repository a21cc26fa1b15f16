//! Category-filtered, optionally ANSI-colored logging, driven by the
//! `ROST_LOG`/`ROST_COLOR_LOG` environment variables.
//!
//! Ported from `rost_log.cpp`'s bitmask-of-categories approach: rather than
//! a single global verbosity level, each log call carries a set of
//! categories and is only emitted if it intersects the mask parsed from
//! `ROST_LOG`.

use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

bitflags::bitflags! {
    /// Mirrors `rost_log::log_type` from the original runtime.
    pub struct LogCategory: u32 {
        const ERR    = 1 << 0;
        const MEM    = 1 << 1;
        const COMM   = 1 << 2;
        const TASK   = 1 << 3;
        const UPCALL = 1 << 4;
        const DOM    = 1 << 5;
        const ULOG   = 1 << 6;
        const TRACE  = 1 << 7;
        const DWARF  = 1 << 8;
        const CACHE  = 1 << 9;
        const TIMER  = 1 << 10;
        const ALL    = 0x7ff;
    }
}

impl LogCategory {
    /// ANSI foreground color code for the category, matching
    /// `rost_log::get_type_color`.
    fn ansi_color(self) -> &'static str {
        if self.contains(LogCategory::ERR) {
            "\x1b[31m"
        } else if self.contains(LogCategory::UPCALL) {
            "\x1b[32m"
        } else if self.contains(LogCategory::COMM) {
            "\x1b[35m"
        } else if self.contains(LogCategory::DOM) || self.contains(LogCategory::TASK) {
            "\x1b[36m"
        } else if self.contains(LogCategory::MEM) {
            "\x1b[33m"
        } else {
            "\x1b[37m"
        }
    }

    /// Parses the substring-matched `ROST_LOG` syntax: a comma (or
    /// otherwise unstructured) list of category names, matched as
    /// substrings the way the C++ original used `strstr`.
    fn from_env_str(s: &str) -> LogCategory {
        let mut bits = LogCategory::empty();
        let table: &[(&str, LogCategory)] = &[
            ("err", LogCategory::ERR),
            ("mem", LogCategory::MEM),
            ("comm", LogCategory::COMM),
            ("task", LogCategory::TASK),
            ("up", LogCategory::UPCALL),
            ("dom", LogCategory::DOM),
            ("ulog", LogCategory::ULOG),
            ("trace", LogCategory::TRACE),
            ("dwarf", LogCategory::DWARF),
            ("cache", LogCategory::CACHE),
            ("timer", LogCategory::TIMER),
            ("all", LogCategory::ALL),
        ];
        for (needle, cat) in table {
            if s.contains(needle) {
                bits |= *cat;
            }
        }
        bits
    }

    fn read_from_env() -> LogCategory {
        match env::var("ROST_LOG") {
            Ok(s) => LogCategory::from_env_str(&s),
            Err(_) => LogCategory::ULOG | LogCategory::ERR,
        }
    }
}

/// Per-domain logger. One exists per `Domain`; `dom_tag` distinguishes
/// interleaved domains in the output the way the original colored the
/// domain's pointer value.
pub struct Logger {
    mask: LogCategory,
    use_colors: bool,
    dom_tag: usize,
    indent: AtomicUsize,
}

impl Logger {
    pub fn new(dom_tag: usize) -> Logger {
        Logger {
            mask: LogCategory::read_from_env(),
            use_colors: env::var_os("ROST_COLOR_LOG").is_some(),
            dom_tag,
            indent: AtomicUsize::new(0),
        }
    }

    pub fn is_tracing(&self, cats: LogCategory) -> bool {
        self.mask.intersects(cats)
    }

    pub fn indent(&self) {
        self.indent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outdent(&self) {
        self.indent.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn reset_indent(&self, n: usize) {
        self.indent.store(n, Ordering::Relaxed);
    }

    pub fn trace_ln(&self, cats: LogCategory, message: &str) {
        if !self.is_tracing(cats) {
            return;
        }
        let depth = self.indent.load(Ordering::Relaxed);
        let mut line = String::with_capacity(message.len() + 32);
        if self.use_colors {
            line.push_str(&format!(
                "\x1b[1;36m0x{:08x}\x1b[0m: ",
                self.dom_tag
            ));
        } else {
            line.push_str(&format!("0x{:08x}: ", self.dom_tag));
        }
        for _ in 0..depth {
            line.push('\t');
        }
        if self.use_colors {
            line.push_str(cats.ansi_color());
            line.push_str(message);
            line.push_str("\x1b[0m");
        } else {
            line.push_str(message);
        }
        let _ = writeln!(std::io::stderr(), "{}", line);
    }
}

/// `dom.log(CATS, "format", args...)` analogue: builds the message and
/// forwards to the domain's logger. Used pervasively so every mutation of
/// task/port/channel/cache state leaves a trace at the right category.
#[macro_export]
macro_rules! rost_log {
    ($logger:expr, $cats:expr, $($arg:tt)*) => {
        $logger.trace_ln($cats, &format!($($arg)*))
    };
}
