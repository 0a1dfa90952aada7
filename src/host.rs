//! Interfaces the host application provides to the core

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::api::Credentials;
use crate::error::Result;

/// One-line status display
pub trait StatusSink: Send + Sync {
    fn set_text(&self, text: &str);
}

/// Forwards status text to a sink, skipping repeats of the last line.
pub struct StatusRelay {
    sink: Arc<dyn StatusSink>,
    last: Mutex<Option<String>>,
}

impl StatusRelay {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            sink,
            last: Mutex::new(None),
        }
    }

    pub fn update(&self, text: &str) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if last.as_deref() == Some(text) {
            return;
        }
        *last = Some(text.to_string());
        self.sink.set_text(text);
    }
}

/// Source of upload bytes
pub trait FileReader: Send + Sync {
    fn read_file_for_upload(&self, path: &Path) -> Result<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsFileReader;

impl FileReader for FsFileReader {
    fn read_file_for_upload(&self, path: &Path) -> Result<Vec<u8>> {
        debug!(path = %path.display(), "Reading file for upload");
        Ok(fs::read(path)?)
    }
}

/// Account credentials, persisted and encrypted by the host
pub trait CredentialStore: Send + Sync {
    fn credentials(&self, account: &str) -> Option<Credentials>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    accounts: Mutex<HashMap<String, Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: &str, credentials: Credentials) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(account.to_string(), credentials);
        }
    }

    pub fn remove(&self, account: &str) -> Option<Credentials> {
        self.accounts.lock().ok()?.remove(account)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn credentials(&self, account: &str) -> Option<Credentials> {
        self.accounts.lock().ok()?.get(account).cloned()
    }
}
