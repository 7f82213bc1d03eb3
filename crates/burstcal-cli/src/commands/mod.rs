pub mod check;
pub mod plan;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use burstcal_core::profile::ProfileStore;

fn load_store(path: &Path) -> Result<ProfileStore> {
    ProfileStore::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}
