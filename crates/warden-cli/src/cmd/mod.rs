pub mod check;
pub mod export;
pub mod retention;
pub mod serve;
pub mod verify;
pub mod worker;

use std::path::Path;

use warden_core::executor::ExecutorRegistry;
use warden_server::state::AppState;

/// Open the store under `root` with the built-in echo executors. Real
/// deployments embed the library and inject their own registry.
pub(crate) fn open_state(root: &Path) -> anyhow::Result<AppState> {
    AppState::new(root, ExecutorRegistry::echo())
}
