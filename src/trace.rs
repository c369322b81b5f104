//! Timestamped verbose diagnostics.
//!
//! The builder runs as a child process at appliance boot, so progress
//! messages carry the elapsed time since startup - that is usually the
//! only profiling information available when a boot is slow.

use std::time::Instant;

/// Verbosity state threaded through the build.
///
/// Level 1 (`-v`) prints timestamped phase messages; level 2 (`-vv`)
/// additionally prints one line per examined candidate or archived file.
/// All output goes to stderr, keeping stdout free for `--help` and
/// `--version`.
pub struct Trace {
    start: Instant,
    level: u8,
}

impl Trace {
    pub fn new(level: u8) -> Self {
        Trace {
            start: Instant::now(),
            level,
        }
    }

    /// A silent trace, for callers that have no verbosity to report.
    pub fn quiet() -> Self {
        Trace::new(0)
    }

    /// Print a phase message with the elapsed milliseconds since startup.
    pub fn message(&self, msg: &str) {
        if self.level >= 1 {
            eprintln!(
                "supermin-builder [{:05}ms] {}",
                self.start.elapsed().as_millis(),
                msg
            );
        }
    }

    /// True when per-file detail lines are wanted.
    ///
    /// Callers in hot loops check this before formatting the message.
    pub fn detailed(&self) -> bool {
        self.level >= 2
    }

    /// Print a per-file detail line.
    pub fn detail(&self, msg: &str) {
        if self.level >= 2 {
            eprintln!("{}", msg);
        }
    }
}
