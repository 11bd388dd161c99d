use std::fmt;
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce(bool, Duration) + Send>;

/// Single-shot completion callback for a query attempt.
///
/// Either [`complete`](Self::complete) fires it with the outcome, or dropping the
/// teardown fires it as a failure. The callback runs exactly once.
pub struct Teardown {
    callback: Option<Callback>,
    started: Instant,
}

impl Teardown {
    pub fn new(callback: impl FnOnce(bool, Duration) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            started: Instant::now(),
        }
    }

    pub fn complete(mut self, success: bool) {
        self.fire(success);
    }

    fn fire(&mut self, success: bool) {
        if let Some(callback) = self.callback.take() {
            callback(success, self.started.elapsed());
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.fire(false);
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}
