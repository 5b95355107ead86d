use std::path::Path;

use anyhow::Result;
use warden_core::executor::ExecutorRegistry;

pub fn run(root: &Path, port: u16) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let root = root.to_path_buf();

    rt.block_on(async move {
        tokio::select! {
            res = warden_server::serve(&root, port, ExecutorRegistry::echo()) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })
}
