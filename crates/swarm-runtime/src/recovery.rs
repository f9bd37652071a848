//! Sandbox recovery file.
//!
//! The engine keeps no durable state except this: on unclean shutdown,
//! the ids of still-open Sandbox Gateway instances are written to a
//! single JSON file so the next startup can reclaim them.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarm_core::{SwarmError, SwarmResult};

pub const RECOVERY_FILE: &str = "sandbox_recovery.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryFile {
    pub sandbox_instances: Vec<String>,
    pub written_at: DateTime<Utc>,
}

/// Persist open sandbox ids. An empty list removes any stale file.
pub fn write_recovery(dir: &Path, instances: &[String]) -> SwarmResult<()> {
    let path = dir.join(RECOVERY_FILE);
    if instances.is_empty() {
        let _ = std::fs::remove_file(&path);
        return Ok(());
    }

    std::fs::create_dir_all(dir)
        .map_err(|e| SwarmError::Config(format!("cannot create recovery dir: {e}")))?;
    let file = RecoveryFile {
        sandbox_instances: instances.to_vec(),
        written_at: Utc::now(),
    };
    let payload = serde_json::to_vec_pretty(&file)?;
    std::fs::write(&path, payload)
        .map_err(|e| SwarmError::Config(format!("cannot write recovery file: {e}")))?;
    Ok(())
}

/// Read and delete the recovery file, returning instance ids to reclaim.
pub fn take_recovery(dir: &Path) -> Vec<String> {
    let path = dir.join(RECOVERY_FILE);
    let Ok(payload) = std::fs::read(&path) else {
        return Vec::new();
    };
    let _ = std::fs::remove_file(&path);
    match serde_json::from_slice::<RecoveryFile>(&payload) {
        Ok(file) => file.sandbox_instances,
        Err(error) => {
            tracing::warn!(
                target: "swarm::recovery",
                error = %error,
                "corrupt recovery file discarded"
            );
            Vec::new()
        }
    }
}
