use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use warden_core::worker::Worker;

/// Run the job worker loop. With `once`, drain the queue and exit — useful
/// for cron-style deployments and for scripting.
pub fn run(root: &Path, interval_secs: u64, once: bool) -> Result<()> {
    let state = super::open_state(root)?;
    let worker_id = format!("worker-{}", std::process::id());
    let worker = Worker::new(&worker_id, state.queue.clone(), state.engine.clone());
    tracing::info!(worker = %worker_id, "worker started");

    loop {
        worker.recover_stale()?;
        // Process everything currently due.
        while worker.tick()? {}
        if once {
            return Ok(());
        }
        std::thread::sleep(Duration::from_secs(interval_secs));
    }
}
