use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde_json::Error as SerdeError;

use crate::domain::ParcelDraft;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "ParcelPortal";
pub const APP_NAME: &str = "ParcelPortal";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
}

/// Where an unfinished booking is kept between runs.
pub fn draft_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("draft.json"))
}

/// Read a saved draft. A missing file is `Ok(None)`; a corrupt one is an error.
pub fn load_draft(path: &Path) -> Result<Option<ParcelDraft>, PersistError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_str(&data)?))
}

pub fn save_draft(path: &Path, draft: &ParcelDraft) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(draft)?;
    fs::write(path, json)?;
    tracing::debug!(path = %path.display(), "saved booking draft");
    Ok(())
}

pub fn discard_draft(path: &Path) -> Result<(), PersistError> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}
