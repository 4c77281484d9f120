//! Human-readable status lines for whatever front-end hosts the server.

use log::debug;
use std::fmt;
use std::sync::Arc;

pub type EventCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Notification hook invoked on start/stop, connects, disconnects, evictions
/// and send errors. Every line is also logged at `debug` level, since the
/// callback is usually what prints it.
#[derive(Clone, Default)]
pub struct EventHook {
    callback: Option<EventCallback>,
}

impl EventHook {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// Hook that only logs.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn emit(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        debug!("{}", line);
        if let Some(callback) = &self.callback {
            callback(line);
        }
    }
}

impl fmt::Debug for EventHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHook")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_reaches_callback() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let hook = EventHook::new(move |line| sink.lock().unwrap().push(line.to_string()));

        hook.emit("alice just connected.");
        hook.clone().emit(format!("{} disconnected", "bob"));

        let lines = lines.lock().unwrap();
        assert_eq!(*lines, vec!["alice just connected.", "bob disconnected"]);
    }

    #[test]
    fn test_silent_hook_does_not_panic() {
        let hook = EventHook::silent();
        hook.emit("nobody listens");
        assert_eq!(format!("{:?}", hook), "EventHook { callback: false }");
    }
}
