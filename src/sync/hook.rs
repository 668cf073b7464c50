//! Exactly-once shutdown callback

use std::sync::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

/// Holds a callback that runs at most once: on the first `fire`, or on drop
/// if it was never fired.
pub struct ShutdownHook {
    callback: Mutex<Option<Callback>>,
}

impl ShutdownHook {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    /// Run the callback if nobody has yet. Returns whether this call ran it.
    pub fn fire(&self) -> bool {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match callback {
            Some(cb) => {
                cb();
                true
            }
            None => false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        self.fire();
    }
}
