//! Checkpoint discovery.
//!
//! Checkpoints are files named `ckpt-<epoch>.pth`; the newest one is the one
//! with the highest epoch number. Finding none is fatal for an evaluation run.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{EvalError, Result};

const PREFIX: &str = "ckpt-";
const SUFFIX: &str = ".pth";

/// Epoch encoded in a checkpoint file name.
pub fn checkpoint_epoch(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(PREFIX)?
        .strip_suffix(SUFFIX)?
        .parse()
        .ok()
}

/// Path of the checkpoint with the highest epoch in `dir`.
pub fn latest_checkpoint(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let no_checkpoint = || EvalError::NoCheckpoint {
        dir: dir.to_path_buf(),
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Cannot read checkpoint dir {}: {}", dir.display(), err);
            return Err(no_checkpoint());
        }
    };

    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(epoch) = name.to_str().and_then(checkpoint_epoch) else {
            continue;
        };
        if best.as_ref().map_or(true, |(e, _)| epoch > *e) {
            best = Some((epoch, entry.path()));
        }
    }

    let (epoch, path) = best.ok_or_else(no_checkpoint)?;
    info!("Latest checkpoint: {} (epoch {})", path.display(), epoch);
    Ok(path)
}
