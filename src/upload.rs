//! Per-file upload entry point driven by the host's upload queue

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::{ConflictPolicy, Credentials, SessionClient, SessionFactory, UploadOutcome, UploadRequest};
use crate::api::transport::TransferProgress;
use crate::error::{Result, UploaderError};
use crate::host::{FileReader, StatusRelay, StatusSink};
use crate::reconciler::{PHOTOGRAPHER_LEAVE_BLANK, SUBSCRIBER_ACCOUNT_LABEL};
use crate::tree::UploadTarget;

const QUEUE_PROTOCOL: &str = "photoshelter";
const STATUS_UPLOADING: &str = "Uploading via secure connection...";

/// Destination and options shared by every file of one queued batch
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSpec {
    pub login: String,
    pub password: String,
    /// Empty for the account's own context
    pub organization: String,
    pub collection_id: String,
    pub gallery_id: String,
    /// Empty for none
    pub photographer: String,
    pub policy: ConflictPolicy,
    pub publicly_searchable: bool,
}

impl UploadSpec {
    /// Build from what the browsing UI shows. The placeholder entries of the
    /// organization and photographer lists map to "none".
    pub fn from_selection(
        credentials: &Credentials,
        organization: Option<&str>,
        target: &UploadTarget,
        photographer: Option<&str>,
        policy: ConflictPolicy,
        publicly_searchable: bool,
    ) -> Self {
        let organization = organization
            .filter(|o| *o != SUBSCRIBER_ACCOUNT_LABEL)
            .unwrap_or_default();
        let photographer = photographer
            .filter(|p| *p != PHOTOGRAPHER_LEAVE_BLANK)
            .unwrap_or_default();
        Self {
            login: credentials.login.clone(),
            password: credentials.password.clone(),
            organization: organization.to_string(),
            collection_id: target.collection_id.clone(),
            gallery_id: target.gallery_id.clone(),
            photographer: photographer.to_string(),
            policy,
            publicly_searchable,
        }
    }

    /// Files with the same key can share one logged-in client.
    pub fn queue_key(&self) -> String {
        [
            QUEUE_PROTOCOL,
            self.login.as_str(),
            self.password.as_str(),
            self.organization.as_str(),
        ]
        .join("\t")
    }

    fn credentials(&self) -> Credentials {
        Credentials::new(&self.login, &self.password)
    }
}

impl fmt::Debug for UploadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSpec")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("organization", &self.organization)
            .field("collection_id", &self.collection_id)
            .field("gallery_id", &self.gallery_id)
            .field("photographer", &self.photographer)
            .field("policy", &self.policy)
            .field("publicly_searchable", &self.publicly_searchable)
            .finish()
    }
}

/// `.jpg` becomes `.JPG`; names without an extension are unchanged.
pub fn uppercase_file_ext(name: &str) -> String {
    match name.rfind('.') {
        Some(dot) => {
            let ext = &name[dot + 1..];
            if ext.is_empty() || ext.contains(['/', '\\']) {
                name.to_string()
            } else {
                format!("{}{}", &name[..=dot], ext.to_uppercase())
            }
        }
        None => name.to_string(),
    }
}

/// Uploads files one at a time for the host's queue, keeping one client
/// open between files of the same account.
pub struct UploadProtocol {
    factory: Arc<dyn SessionFactory>,
    reader: Arc<dyn FileReader>,
    status: Option<StatusRelay>,
    client: Option<SessionClient>,
    opened_for: String,
    progress: TransferProgress,
}

impl UploadProtocol {
    pub fn new(factory: Arc<dyn SessionFactory>, reader: Arc<dyn FileReader>) -> Self {
        Self {
            factory,
            reader,
            status: None,
            client: None,
            opened_for: String::new(),
            progress: TransferProgress::new(),
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = Some(StatusRelay::new(sink));
        self
    }

    pub fn image_upload(
        &mut self,
        local_path: &Path,
        remote_name: &str,
        is_retry: bool,
        spec: &UploadSpec,
    ) -> Result<UploadOutcome> {
        let client = self.ensure_open(spec)?;
        ensure_login(client, spec)?;
        if let Some(status) = &self.status {
            status.update(STATUS_UPLOADING);
        }

        // A retried file may have arrived during the failed attempt.
        let policy = match spec.policy {
            ConflictPolicy::SkipIfExists if is_retry => ConflictPolicy::UploadAnyway,
            policy => policy,
        };
        let request = UploadRequest {
            local_path: local_path.to_path_buf(),
            remote_name: uppercase_file_ext(remote_name),
            gallery_id: spec.gallery_id.clone(),
            collection_id: spec.collection_id.clone(),
            photographer: Some(spec.photographer.clone()).filter(|p| !p.is_empty()),
            publicly_searchable: spec.publicly_searchable,
            policy,
        };
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| UploaderError::Other("Upload session closed".to_string()))?;
        client.upload(&request, self.reader.as_ref())
    }

    /// Reuse the open client unless the account changed.
    fn ensure_open(&mut self, spec: &UploadSpec) -> Result<&mut SessionClient> {
        let client = match self.client.take() {
            Some(client) if self.opened_for == spec.login => client,
            stale => {
                if let Some(mut old) = stale {
                    warn!(login = %spec.login, "Upload account changed, reopening session");
                    old.logout();
                }
                let mut client = self
                    .factory
                    .open(&spec.credentials())?
                    .with_transfer_progress(self.progress.clone());
                client.login()?;
                info!(login = %client.user_login(), "Upload session opened");
                self.opened_for = spec.login.clone();
                client
            }
        };
        Ok(self.client.insert(client))
    }

    /// Counters of the transfer in flight: (bytes to write, bytes written).
    pub fn poll_transfer_status(&self) -> (u64, u64) {
        (self.progress.bytes_to_write(), self.progress.bytes_written())
    }

    pub fn reset_transfer_status(&self) {
        self.progress.reset();
    }

    pub fn abort_transfer(&self) {
        self.progress.abort();
    }

    /// Handle for polling or aborting from another thread while
    /// `image_upload` blocks.
    pub fn transfer_handle(&self) -> TransferProgress {
        self.progress.clone()
    }

    /// End the open session, if any.
    pub fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.logout();
        }
    }
}

impl Drop for UploadProtocol {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bring the client into the requested organization and learn photographer ids
/// when a photographer is named.
fn ensure_login(client: &mut SessionClient, spec: &UploadSpec) -> Result<()> {
    if !client.is_logged_in() {
        client.login()?;
    }
    if spec.organization.is_empty() {
        client.leave_organization()?;
    } else {
        client.switch_organization(&spec.organization)?;
    }
    if !spec.photographer.is_empty()
        && client.photographer_id(&spec.photographer).is_none()
        && client.can_list_photographers()
    {
        client.photographers()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{login_xml, ok, total, MemoryFiles, MockFactory, MockServer};
    use std::path::PathBuf;

    fn spec(policy: ConflictPolicy) -> UploadSpec {
        UploadSpec {
            login: "me@example.com".into(),
            password: "pw".into(),
            organization: "Acme".into(),
            collection_id: String::new(),
            gallery_id: "G1".into(),
            photographer: String::new(),
            policy,
            publicly_searchable: false,
        }
    }

    fn protocol(server: &MockServer) -> UploadProtocol {
        UploadProtocol::new(
            Arc::new(MockFactory::new(server)),
            Arc::new(MemoryFiles::with("/photos/img_01.jpg", b"pixels")),
        )
    }

    fn upload_server() -> MockServer {
        let server = MockServer::new();
        server.route("mem/authenticate", login_xml("tok", &[("O1", "Acme", true)]));
        server.route("mem/organization/O1/authenticate", ok(""));
        server.route("mem/image/upload", ok(""));
        server.route("auth", ok(""));
        server
    }

    #[test]
    fn test_uppercase_file_ext() {
        assert_eq!(uppercase_file_ext("img_01.jpg"), "img_01.JPG");
        assert_eq!(uppercase_file_ext("a.b.tiff"), "a.b.TIFF");
        assert_eq!(uppercase_file_ext("noext"), "noext");
        assert_eq!(uppercase_file_ext("trailing."), "trailing.");
        assert_eq!(uppercase_file_ext("dir.d/file"), "dir.d/file");
    }

    #[test]
    fn test_queue_key_and_placeholders() {
        let creds = Credentials::new("me@example.com", "pw");
        let target = UploadTarget {
            collection_id: "C1".into(),
            gallery_id: String::new(),
        };
        let spec = UploadSpec::from_selection(
            &creds,
            Some(SUBSCRIBER_ACCOUNT_LABEL),
            &target,
            Some(PHOTOGRAPHER_LEAVE_BLANK),
            ConflictPolicy::SkipIfExists,
            true,
        );

        assert_eq!(spec.organization, "");
        assert_eq!(spec.photographer, "");
        assert_eq!(spec.collection_id, "C1");
        assert_eq!(spec.queue_key(), "photoshelter\tme@example.com\tpw\t");
        assert!(!format!("{:?}", spec).contains("\"pw\""));
    }

    #[test]
    fn test_upload_enters_org_and_uppercases_extension() {
        let server = upload_server();
        let mut protocol = protocol(&server);

        let outcome = protocol
            .image_upload(
                &PathBuf::from("/photos/img_01.jpg"),
                "img_01.jpg",
                false,
                &spec(ConflictPolicy::UploadAnyway),
            )
            .unwrap();

        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                remote_name: "img_01.JPG".into(),
                gallery_id: "G1".into(),
            }
        );
        assert_eq!(server.count_path("mem/organization/O1/authenticate"), 1);
        assert!(server.last_request().unwrap().body.contains("filename=\"img_01.JPG\""));
        let (to_write, written) = protocol.poll_transfer_status();
        assert!(to_write > 0);
        assert_eq!(to_write, written);
    }

    #[test]
    fn test_second_file_reuses_session() {
        let server = upload_server();
        let mut protocol = protocol(&server);
        let spec = spec(ConflictPolicy::UploadAnyway);

        for _ in 0..2 {
            protocol
                .image_upload(&PathBuf::from("/photos/img_01.jpg"), "img_01.jpg", false, &spec)
                .unwrap();
        }

        assert_eq!(server.count_path("mem/authenticate"), 1);
        assert_eq!(server.count_path("mem/organization/O1/authenticate"), 1);
        assert_eq!(server.count_path("mem/image/upload"), 2);
    }

    #[test]
    fn test_skip_becomes_upload_on_retry() {
        let server = upload_server();
        server.route("mem/image/query", total(1));
        let mut protocol = protocol(&server);
        let spec = spec(ConflictPolicy::SkipIfExists);
        let path = PathBuf::from("/photos/img_01.jpg");

        let first = protocol.image_upload(&path, "img_01.jpg", false, &spec).unwrap();
        assert_eq!(first, UploadOutcome::Skipped);
        assert_eq!(server.count_path("mem/image/upload"), 0);

        let retried = protocol.image_upload(&path, "img_01.jpg", true, &spec).unwrap();
        assert!(matches!(retried, UploadOutcome::Uploaded { .. }));
        assert_eq!(server.count_path("mem/image/upload"), 1);
    }

    #[test]
    fn test_account_change_reopens_session() {
        let server = upload_server();
        let mut protocol = protocol(&server);
        let path = PathBuf::from("/photos/img_01.jpg");

        protocol
            .image_upload(&path, "img_01.jpg", false, &spec(ConflictPolicy::UploadAnyway))
            .unwrap();
        let mut other = spec(ConflictPolicy::UploadAnyway);
        other.login = "someone@example.com".into();
        protocol.image_upload(&path, "img_01.jpg", false, &other).unwrap();

        assert_eq!(server.count_path("auth"), 1);
        assert_eq!(server.count_path("mem/authenticate"), 2);
    }

    #[test]
    fn test_abort_and_reset() {
        let server = upload_server();
        let protocol = protocol(&server);
        let handle = protocol.transfer_handle();

        protocol.abort_transfer();
        assert!(handle.is_aborted());
        protocol.reset_transfer_status();
        assert!(!handle.is_aborted());
        assert_eq!(protocol.poll_transfer_status(), (0, 0));
    }
}
