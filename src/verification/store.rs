//! Durable contract files: one JSON document per session.

use crate::error::{OrchestratorError, StorageError};
use crate::verification::contract::SessionContract;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// `<workspace>/.conductor/contracts`
pub fn workspace_contracts_dir(workspace: &Path) -> PathBuf {
    workspace.join(".conductor").join("contracts")
}

/// Per-user data directory fallback when no workspace is known.
pub fn default_contracts_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "conductor").map(|dirs| dirs.data_dir().join("contracts"))
}

#[derive(Debug, Clone)]
pub struct ContractStore {
    dir: PathBuf,
}

impl ContractStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for a session. Bytes outside `[A-Za-z0-9.-]` become `_XX` hex escapes, so distinct
    /// ids never share a file.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        let mut file = String::with_capacity(session_id.len());
        for byte in session_id.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.') {
                file.push(byte as char);
            } else {
                file.push('_');
                file.push_str(&hex::encode_upper([byte]));
            }
        }
        self.dir.join(format!("{}.json", file))
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.path_for(session_id).is_file()
    }

    /// Write a new contract. Contracts are immutable, so an existing file is an error.
    pub fn create(&self, contract: &SessionContract) -> Result<PathBuf, OrchestratorError> {
        let path = self.path_for(&contract.session_id);
        if path.exists() {
            return Err(OrchestratorError::ContractExists(contract.session_id.clone()));
        }
        fs::create_dir_all(&self.dir).map_err(StorageError::from)?;

        let json = serde_json::to_vec_pretty(contract).map_err(StorageError::from)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(StorageError::from)?;
        fs::rename(&tmp, &path).map_err(StorageError::from)?;
        debug!(session_id = %contract.session_id, path = %path.display(), "Contract written");
        Ok(path)
    }

    pub fn load(&self, session_id: &str) -> Result<Option<SessionContract>, OrchestratorError> {
        let path = self.path_for(session_id);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read(&path).map_err(StorageError::from)?;
        let contract: SessionContract = serde_json::from_slice(&raw).map_err(StorageError::from)?;
        if contract.session_id != session_id {
            return Err(StorageError::InvalidPath(format!(
                "{} holds the contract of session {}",
                path.display(),
                contract.session_id
            ))
            .into());
        }
        Ok(Some(contract))
    }

    /// Delete a session's contract file, if any.
    pub fn remove(&self, session_id: &str) -> Result<(), OrchestratorError> {
        let path = self.path_for(session_id);
        if path.is_file() {
            fs::remove_file(&path).map_err(StorageError::from)?;
            debug!(session_id, path = %path.display(), "Contract removed");
        }
        Ok(())
    }

    /// Every readable contract, ordered by session id. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<SessionContract>, OrchestratorError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut contracts = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                StorageError::InvalidPath(format!("{}: {}", self.dir.display(), e))
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let raw = fs::read(path).map_err(StorageError::from)?;
            match serde_json::from_slice::<SessionContract>(&raw) {
                Ok(contract) => contracts.push(contract),
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable contract"),
            }
        }
        contracts.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(contracts)
    }
}
