//! Collection uploader core
//!
//! Browses the collection and gallery tree of a remote photo archive and
//! uploads files into it on behalf of a host application.
//!
//! ## Module Organization
//!
//! - `api/`: Session-aware client, HTTP transport and XML responses
//! - `tree/`: Lazily populated folder tree and the column browser cache
//! - `reconciler/`: Background worker matching the wanted account state
//! - `upload`: Per-file upload entry point for the host's queue
//! - `host`: Interfaces the host provides (status line, files, credentials)
//! - `config`: API settings loaded from TOML
//! - `logging`: tracing subscriber setup

pub mod api;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod reconciler;
pub mod tree;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use api::{ConflictPolicy, Credentials, HttpSessionFactory, NewFolder, SessionClient, UploadOutcome};
pub use error::{Result, UploaderError};
pub use reconciler::AccountReconciler;
pub use tree::{CollectionTree, ColumnCache, SharedSession, SharedTree, TreeNode};
pub use upload::{UploadProtocol, UploadSpec};
