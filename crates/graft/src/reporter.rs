//! UI callback seam.
//!
//! The engine never prints; it narrates through a [`Reporter`] the caller
//! supplies. Implementations must be thread-safe: the parallel executor
//! shares one reporter across every worker as
//! `Arc<Mutex<dyn Reporter + Send>>`.

use std::sync::{Arc, Mutex};

/// Progress callback surface.
pub trait Reporter: Send {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Reporter handle shared across workers.
pub type SharedReporter = Arc<Mutex<dyn Reporter + Send>>;

/// Swallows everything; the default for library callers and tests.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

/// Plain line-per-message stderr reporter used by the CLI.
#[derive(Debug, Default)]
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("{msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("warning: {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("error: {msg}");
    }
}

/// A shared [`NullReporter`].
pub fn null_shared() -> SharedReporter {
    Arc::new(Mutex::new(NullReporter))
}

/// Collects messages for assertions.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    pub lines: Vec<String>,
}

impl Reporter for MemoryReporter {
    fn info(&mut self, msg: &str) {
        self.lines.push(format!("info: {msg}"));
    }

    fn warn(&mut self, msg: &str) {
        self.lines.push(format!("warn: {msg}"));
    }

    fn error(&mut self, msg: &str) {
        self.lines.push(format!("error: {msg}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reporter_tags_levels() {
        let mut rep = MemoryReporter::default();
        rep.info("syncing utils");
        rep.warn("slow fetch");
        rep.error("hook failed");
        assert_eq!(
            rep.lines,
            vec![
                "info: syncing utils",
                "warn: slow fetch",
                "error: hook failed"
            ]
        );
    }

    #[test]
    fn shared_reporter_is_usable_across_threads() {
        let concrete = Arc::new(Mutex::new(MemoryReporter::default()));
        let shared: SharedReporter = concrete.clone();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    shared.lock().unwrap().info(&format!("worker {i}"));
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join");
        }
        // Four messages, order unspecified.
        assert_eq!(concrete.lock().unwrap().lines.len(), 4);
    }
}
