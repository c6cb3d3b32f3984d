use std::io;
use std::sync::OnceLock;

use parking_lot::{const_mutex, Mutex};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Overrides the number of runtime worker threads.
pub const WORKER_THREADS_ENV: &str = "HUBTUNNEL_WORKER_THREADS";

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static INIT: Mutex<()> = const_mutex(());

/// The process-wide runtime, built on first use.
pub(crate) fn runtime() -> io::Result<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }

    let _init = INIT.lock();
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let built = build(worker_threads(std::env::var(WORKER_THREADS_ENV).ok().as_deref()))?;
    Ok(RUNTIME.get_or_init(|| built))
}

fn build(worker_threads: Option<usize>) -> io::Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder.enable_all().thread_name("hubtunnel-worker");
    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }
    let runtime = builder.build()?;
    debug!(?worker_threads, "started hubtunnel runtime");
    Ok(runtime)
}

fn worker_threads(value: Option<&str>) -> Option<usize> {
    value
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|&threads| threads > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_thread_override_parsing() {
        assert_eq!(worker_threads(Some("4")), Some(4));
        assert_eq!(worker_threads(Some(" 2 ")), Some(2));
        assert_eq!(worker_threads(Some("0")), None);
        assert_eq!(worker_threads(Some("many")), None);
        assert_eq!(worker_threads(None), None);
    }

    #[test]
    fn runtime_is_shared() {
        let first = runtime().unwrap() as *const Runtime;
        let second = runtime().unwrap() as *const Runtime;
        assert_eq!(first, second);
    }
}
