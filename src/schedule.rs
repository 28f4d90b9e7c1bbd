use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};

#[derive(Debug)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    /// Wall-clock seconds at millisecond resolution.
    pub fn seconds(&self) -> f64 {
        self.elapsed.as_millis() as f64 / 1000.0
    }
}

/// A batch running off the calling thread.
pub struct BatchTask<T> {
    handle: JoinHandle<Timed<T>>,
}

impl<T> BatchTask<T> {
    pub fn join(self) -> Result<Timed<T>> {
        self.handle.join().map_err(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            anyhow!("batch worker panicked: {reason}")
        })
    }
}

/// Runs `job` on a named background thread and times it.
pub fn run_async<T, F>(name: &str, job: F) -> Result<BatchTask<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("eolunify-{name}"))
        .spawn(move || {
            let started = Instant::now();
            let value = job();
            Timed {
                value,
                elapsed: started.elapsed(),
            }
        })
        .with_context(|| format!("spawning {name} worker"))?;
    Ok(BatchTask { handle })
}
