use std::io::Write as _;
use std::sync::Mutex;

/// Channel for short-lived, user-visible payloads (the shared copy of a synced doc).
pub trait Notifier: Send + Sync {
    fn notify(&self, payload: &str);
}

/// Writes payloads to stdout, one per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn notify(&self, payload: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = writeln!(stdout, "{payload}") {
            tracing::warn!(?err, "failed to write payload to stdout");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _payload: &str) {}
}

/// Keeps every payload in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    payloads: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads
            .lock()
            .map(|payloads| payloads.clone())
            .unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, payload: &str) {
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload.to_owned());
        }
    }
}
