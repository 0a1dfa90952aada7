//! Session-aware client for the photo service API
//!
//! One `SessionClient` owns one authenticated connection. Every domain
//! operation runs inside `with_session_retry`: when the server reports an
//! expired session the local credentials are dropped, the client logs in
//! again and the whole operation runs once more. A second expiry surfaces.

pub mod cookie;
pub mod multipart;
pub mod response;
pub mod transport;
pub mod types;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, AuthMode};
use crate::error::{Result, UploaderError};
use crate::host::FileReader;
use crate::logging::fmt_ms;
use crate::tree::{CollectionTree, NodeKind, TreeNode, ROOT_ID};

use multipart::{image_content_type, MultipartBody};
use response::{parse_data, parse_ok, ChildrenData, IdData, LoginData, PhotographersData, TotalData};
use transport::{ApiRequest, HttpTransport, RawResponse, TransferProgress, Transport};

pub use types::{Credentials, Organization, Photographer, Session};

/// What to do when the remote file name is already taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    #[default]
    UploadAnyway,
    RenameBeforeUpload,
    SkipIfExists,
}

/// One file to send
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub local_path: PathBuf,
    pub remote_name: String,
    /// Target gallery; empty to derive it from `collection_id`
    pub gallery_id: String,
    pub collection_id: String,
    pub photographer: Option<String>,
    pub publicly_searchable: bool,
    pub policy: ConflictPolicy,
}

/// Result of an upload that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { remote_name: String, gallery_id: String },
    /// The name was taken and the policy said to leave it alone
    Skipped,
}

/// Parameters for a new collection or gallery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFolder {
    /// Empty for a top-level folder
    pub parent_id: String,
    pub kind: NodeKind,
    pub name: String,
    /// `None` leaves the server default
    pub listed: Option<bool>,
    pub inherit_permissions: bool,
    pub visibility: String,
}

pub struct SessionClient {
    config: ApiConfig,
    login: String,
    password: String,
    transport: Box<dyn Transport>,
    session: Session,
    photographer_ids: HashMap<String, String>,
    progress: TransferProgress,
}

impl SessionClient {
    pub fn new(config: ApiConfig, credentials: &Credentials, transport: Box<dyn Transport>) -> Self {
        let (login, _) = credentials.endpoint();
        Self {
            config,
            login: login.to_string(),
            password: credentials.password.clone(),
            transport,
            session: Session::default(),
            photographer_ids: HashMap::new(),
            progress: TransferProgress::new(),
        }
    }

    /// HTTP-backed client, honouring a `login|https://host` override.
    pub fn connect(config: ApiConfig, credentials: &Credentials) -> Result<Self> {
        let config = match credentials.endpoint() {
            (_, Some(uri)) => {
                url::Url::parse(uri)
                    .map_err(|e| UploaderError::Config(format!("Invalid server override '{}': {}", uri, e)))?;
                config.with_base_url(uri)
            }
            (_, None) => config,
        };
        let transport = HttpTransport::new(config.clone())?;
        Ok(Self::new(config, credentials, Box::new(transport)))
    }

    /// Report upload counters through an existing handle.
    pub fn with_transfer_progress(mut self, progress: TransferProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn user_login(&self) -> &str {
        &self.login
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    pub fn single_user_access(&self) -> bool {
        self.session.single_user_access()
    }

    pub fn multi_user_access(&self) -> bool {
        self.session.multi_user_access()
    }

    /// Folder queries need a full-member org, or single-user access when no
    /// org is active.
    pub fn can_query_tree(&self) -> bool {
        match self.session.active_org() {
            Some(org) => org.full_member,
            None => self.session.single_user_access(),
        }
    }

    pub fn can_list_photographers(&self) -> bool {
        self.session.active_org().is_some()
    }

    pub fn can_make_publicly_searchable(&self) -> bool {
        self.can_query_tree()
    }

    fn send(&mut self, request: ApiRequest) -> Result<RawResponse> {
        let mut request = request.header("X-PS-Api-Key", &self.config.api_key);
        if let Some(token) = &self.session.token {
            request = request.header("X-PS-Auth-Token", token);
        }
        if let Some(cookie) = self.session.cookies.header() {
            request = request.header("Cookie", &cookie);
        }

        let response = self.transport.send(request)?;

        // The server refreshes the session cookie on every response.
        if self.config.auth_mode == AuthMode::Cookie {
            for raw in &response.set_cookies {
                self.session.cookies.accept(raw);
            }
        }
        Ok(response)
    }

    /// Authenticate with the stored credentials. Not retried.
    pub fn login(&mut self) -> Result<&Session> {
        let start = Instant::now();
        self.session = Session::default();

        let body = MultipartBody::new(&self.login)
            .text("email", &self.login)
            .text("password", &self.password)
            .text("mode", self.config.auth_mode.as_str());
        let content_type = body.content_type();
        let request = ApiRequest::post("mem/authenticate", &content_type, body.finish());

        let data: LoginData = match self.send(request).and_then(|resp| parse_data(&resp)) {
            Ok(data) => data,
            Err(e) => {
                self.session = Session::default();
                warn!(login = %self.login, "Login failed: {}", e);
                return Err(match e {
                    UploaderError::SessionExpired(msg) => UploaderError::Auth(msg),
                    UploaderError::Remote { class, message } => {
                        UploaderError::Auth(format!("{}: {}", class, message))
                    }
                    other => other,
                });
            }
        };

        match self.config.auth_mode {
            AuthMode::Token => {
                let token = data.token.trim();
                if token.is_empty() {
                    self.session = Session::default();
                    return Err(UploaderError::Protocol(
                        "login response carried no session token".to_string(),
                    ));
                }
                self.session.token = Some(token.to_string());
            }
            AuthMode::Cookie => {
                if self.session.cookies.is_empty() {
                    return Err(UploaderError::Protocol(
                        "login response set no session cookie".to_string(),
                    ));
                }
            }
        }

        self.session.orgs = data.organizations();
        self.session.single_user = data.single_user();
        self.session.first_name = data.first_name.trim().to_string();
        self.session.last_name = data.last_name.trim().to_string();

        info!(
            login = %self.login,
            orgs = self.session.orgs.len(),
            elapsed = %fmt_ms(start.elapsed()),
            "Logged in"
        );
        Ok(&self.session)
    }

    /// End the server session if there is one. Local state is always cleared.
    pub fn logout(&mut self) {
        if self.session.is_logged_in() {
            if let Err(e) = self.send(ApiRequest::get("auth")) {
                debug!("Logout request failed: {}", e);
            }
        }
        self.session.clear_auth();
        self.session.active_org_id = None;
    }

    /// Log in when no token or cookie is held, and re-enter the organization
    /// that was active before the session was dropped.
    fn ensure_logged_in(&mut self) -> Result<()> {
        if self.session.is_logged_in() {
            return Ok(());
        }
        let previous_org = self.session.active_org().map(|o| o.name.clone());
        self.login()?;
        if let Some(name) = previous_org {
            if let Some(org) = self.session.find_org(&name).cloned() {
                self.enter_org_once(&org)?;
            }
        }
        Ok(())
    }

    fn with_session_retry<T>(&mut self, mut op: impl FnMut(&mut Self) -> Result<T>) -> Result<T> {
        match op(self) {
            Err(e) if e.is_session_expired() => {
                warn!(login = %self.login, "Session expired, logging in again: {}", e);
                self.session.clear_auth();
                let retried = op(self);
                if let Err(e) = &retried {
                    if e.is_session_expired() {
                        self.session.clear_auth();
                    }
                }
                retried
            }
            other => other,
        }
    }

    pub fn switch_organization(&mut self, name: &str) -> Result<()> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            let org = this
                .session
                .find_org(name)
                .cloned()
                .ok_or_else(|| UploaderError::NotFound(format!("No organization found named '{}'", name)))?;
            if this.session.active_org_id.as_deref() == Some(org.id.as_str()) {
                return Ok(());
            }
            this.enter_org_once(&org)
        })
    }

    fn enter_org_once(&mut self, org: &Organization) -> Result<()> {
        let path = format!("mem/organization/{}/authenticate", escape(&org.id));
        let resp = self.send(ApiRequest::get(&path).query("format", "xml"))?;
        parse_ok(&resp)?;
        self.session.active_org_id = Some(org.id.clone());
        info!(org = %org.name, "Entered organization");
        Ok(())
    }

    /// Back to the account's own context. No-op when no org is active.
    pub fn leave_organization(&mut self) -> Result<()> {
        if self.session.active_org_id.is_none() {
            return Ok(());
        }
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            if this.session.active_org_id.is_none() {
                return Ok(());
            }
            let resp = this.send(ApiRequest::get("mem/organization/logout").query("format", "xml"))?;
            parse_ok(&resp)?;
            this.session.active_org_id = None;
            info!("Left organization");
            Ok(())
        })
    }

    pub fn query_root_children(&mut self) -> Result<CollectionTree> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            let nodes = this.children_once(ROOT_ID)?;
            Ok(CollectionTree::from_root(nodes))
        })
    }

    pub fn query_children(&mut self, node_id: &str) -> Result<Vec<TreeNode>> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            this.children_once(node_id)
        })
    }

    fn children_once(&mut self, node_id: &str) -> Result<Vec<TreeNode>> {
        if !self.can_query_tree() {
            return Err(UploaderError::Permission(
                "Collection query access not available for this account or organization.".to_string(),
            ));
        }
        let path = format!("mem/collection/{}/children", escape(node_id));
        let resp = self.send(ApiRequest::get(&path).query("format", "xml"))?;
        let data: ChildrenData = parse_data(&resp)?;
        let nodes = data.into_nodes(node_id);
        debug!(node_id = %node_id, count = nodes.len(), "Fetched children");
        Ok(nodes)
    }

    /// Photographers of the active organization; refreshes the name to id map
    /// used by uploads.
    pub fn photographers(&mut self) -> Result<Vec<Photographer>> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            let org_id = this.session.active_org_id.clone().ok_or_else(|| {
                UploaderError::Permission("Photographer list requires an organization".to_string())
            })?;
            let path = format!("mem/organization/{}/photographers", escape(&org_id));
            let resp = this.send(ApiRequest::get(&path).query("format", "xml"))?;
            let data: PhotographersData = parse_data(&resp)?;
            let photographers = data.into_photographers();
            for p in &photographers {
                this.photographer_ids.insert(p.full_name(), p.user_id.clone());
            }
            Ok(photographers)
        })
    }

    pub fn photographer_id(&self, full_name: &str) -> Option<&str> {
        self.photographer_ids.get(full_name).map(String::as_str)
    }

    pub fn image_exists(&mut self, gallery_id: &str, file_name: &str) -> Result<bool> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            this.image_exists_once(gallery_id, file_name)
        })
    }

    fn image_exists_once(&mut self, gallery_id: &str, file_name: &str) -> Result<bool> {
        let gallery_id = if gallery_id.trim().is_empty() {
            self.config.default_gallery.clone()
        } else {
            gallery_id.to_string()
        };
        let body = MultipartBody::new(&gallery_id)
            .text("gallery_id", &gallery_id)
            .text("file_name", file_name);
        let content_type = body.content_type();
        let request = ApiRequest::post("mem/image/query", &content_type, body.finish()).query("format", "xml");
        let resp = self.send(request)?;
        let data: TotalData = parse_data(&resp)?;
        Ok(data.count() > 0)
    }

    /// First free name among `name`, then `nameA.ext` through `nameZ.ext`.
    pub fn find_unique_filename(&mut self, gallery_id: &str, name: &str) -> Result<String> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            this.find_unique_once(gallery_id, name)
        })
    }

    fn find_unique_once(&mut self, gallery_id: &str, name: &str) -> Result<String> {
        let (base, ext) = match name.rsplit_once('.') {
            Some((base, ext)) => (base, Some(ext)),
            None => (name, None),
        };
        let suffixes = std::iter::once(String::new()).chain(('A'..='Z').map(String::from));
        for suffix in suffixes {
            let candidate = match ext {
                Some(ext) => format!("{}{}.{}", base, suffix, ext),
                None => format!("{}{}", base, suffix),
            };
            if !self.image_exists_once(gallery_id, &candidate)? {
                return Ok(candidate);
            }
        }
        Err(UploaderError::Other(format!(
            "Failed all attempts to find unique name for file {} in gallery {}.",
            name, gallery_id
        )))
    }

    /// Gallery that receives uploads aimed at a collection; empty when the
    /// collection has none.
    pub fn uploader_gallery_for(&mut self, collection_id: &str) -> Result<String> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            this.uploader_gallery_once(collection_id)
        })
    }

    fn uploader_gallery_once(&mut self, collection_id: &str) -> Result<String> {
        let children = self.children_once(collection_id)?;
        Ok(children
            .into_iter()
            .find(|n| n.kind == NodeKind::Gallery && n.name == self.config.uploader_gallery)
            .map(|n| n.id)
            .unwrap_or_default())
    }

    /// Create a collection or gallery and return its id. The follow-up
    /// permission call is retried on its own so an expiry there does not
    /// create the folder twice.
    pub fn create_folder(&mut self, folder: &NewFolder) -> Result<String> {
        let id = self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            let mut body = MultipartBody::new(&folder.name);
            if !folder.parent_id.is_empty() {
                body = body.text("parent", &folder.parent_id);
            }
            if let Some(listed) = folder.listed {
                body = body.text("f_list", if listed { "t" } else { "f" });
            }
            body = body.text("name", &folder.name);
            let content_type = body.content_type();
            let path = format!("mem/{}/insert", folder.kind.as_str());
            let request = ApiRequest::post(&path, &content_type, body.finish()).query("format", "xml");
            let resp = this.send(request)?;
            let data: IdData = parse_data(&resp)?;
            Ok(data.id.trim().to_string())
        })?;
        info!(node_id = %id, kind = folder.kind.as_str(), "Created folder");

        if folder.inherit_permissions {
            self.update_inherit(&id, folder.kind, &folder.parent_id)?;
        } else if !folder.visibility.is_empty() {
            self.update_visibility(&id, folder.kind, &folder.visibility)?;
        }
        Ok(id)
    }

    pub fn update_inherit(&mut self, id: &str, kind: NodeKind, parent_id: &str) -> Result<()> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            let body = MultipartBody::new(id)
                .text("collection_id", parent_id)
                .text("inherit", "t");
            let content_type = body.content_type();
            let path = format!("mem/{}/{}/permission/inherit", kind.as_str(), escape(id));
            let request = ApiRequest::post(&path, &content_type, body.finish()).query("format", "xml");
            let resp = this.send(request)?;
            parse_ok(&resp)
        })
    }

    pub fn update_visibility(&mut self, id: &str, kind: NodeKind, visibility: &str) -> Result<()> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            let body = MultipartBody::new(id).text("mode", visibility);
            let content_type = body.content_type();
            let path = format!("mem/{}/{}/visibility/update", kind.as_str(), escape(id));
            let request = ApiRequest::post(&path, &content_type, body.finish()).query("format", "xml");
            let resp = this.send(request)?;
            parse_ok(&resp)
        })
    }

    pub fn upload(&mut self, request: &UploadRequest, reader: &dyn FileReader) -> Result<UploadOutcome> {
        self.with_session_retry(|this| {
            this.ensure_logged_in()?;
            this.upload_once(request, reader)
        })
    }

    fn upload_once(&mut self, request: &UploadRequest, reader: &dyn FileReader) -> Result<UploadOutcome> {
        let mut gallery_id = request.gallery_id.clone();
        if gallery_id.is_empty() && !request.collection_id.is_empty() {
            gallery_id = self.uploader_gallery_once(&request.collection_id)?;
        }

        let remote_name = match request.policy {
            ConflictPolicy::UploadAnyway => request.remote_name.clone(),
            ConflictPolicy::SkipIfExists => {
                if self.image_exists_once(&gallery_id, &request.remote_name)? {
                    info!(file = %request.remote_name, "Skipping existing file");
                    return Ok(UploadOutcome::Skipped);
                }
                request.remote_name.clone()
            }
            ConflictPolicy::RenameBeforeUpload => self.find_unique_once(&gallery_id, &request.remote_name)?,
        };

        let data = reader.read_file_for_upload(&request.local_path)?;
        let seed = request.local_path.to_string_lossy();
        let mut body = MultipartBody::new(&seed).file(
            "file",
            &remote_name,
            image_content_type(&remote_name),
            &data,
        );
        body = if gallery_id.is_empty() {
            body.text("parent_id", &request.collection_id)
        } else {
            body.text("gallery_id", &gallery_id)
        };
        if let Some(name) = &request.photographer {
            if let Some(id) = self.photographer_ids.get(name) {
                body = body.text("photographer_id", id);
            }
        }
        if request.publicly_searchable {
            body = body.text("f_searchable", "t");
        }

        let start = Instant::now();
        let content_type = body.content_type();
        let api_request = ApiRequest::post("mem/image/upload", &content_type, body.finish())
            .with_progress(self.progress.clone());
        let resp = self.send(api_request)?;
        parse_ok(&resp)?;

        info!(
            file = %remote_name,
            gallery_id = %gallery_id,
            bytes = data.len(),
            elapsed = %fmt_ms(start.elapsed()),
            "Uploaded"
        );
        Ok(UploadOutcome::Uploaded {
            remote_name,
            gallery_id,
        })
    }

    /// Shared handle on the upload counters, usable without borrowing the client.
    pub fn transfer_progress(&self) -> TransferProgress {
        self.progress.clone()
    }

    pub fn bytes_to_write(&self) -> u64 {
        self.progress.bytes_to_write()
    }

    pub fn bytes_written(&self) -> u64 {
        self.progress.bytes_written()
    }

    pub fn reset_transfer_status(&self) {
        self.progress.reset();
    }

    /// Fail the in-flight upload body. Stays in effect until
    /// `reset_transfer_status`.
    pub fn abort_transfer(&self) {
        self.progress.abort();
    }
}

fn escape(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Opens unauthenticated clients for a set of credentials
pub trait SessionFactory: Send + Sync {
    fn open(&self, credentials: &Credentials) -> Result<SessionClient>;
}

pub struct HttpSessionFactory {
    config: ApiConfig,
}

impl HttpSessionFactory {
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }
}

impl SessionFactory for HttpSessionFactory {
    fn open(&self, credentials: &Credentials) -> Result<SessionClient> {
        SessionClient::connect(self.config.clone(), credentials)
    }
}
