//! Scripted server, sources and sinks shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::api::transport::{ApiRequest, RawResponse, Transport};
use crate::api::{Credentials, SessionClient, SessionFactory};
use crate::config::ApiConfig;
use crate::error::{Result, TransportFailure, UploaderError};
use crate::host::{FileReader, StatusSink};
use crate::tree::{ChildSource, NodeKind, TreeNode};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct ServerState {
    routes: HashMap<String, VecDeque<RawResponse>>,
    body_routes: Vec<(String, String, RawResponse)>,
    requests: Vec<RecordedRequest>,
}

/// In-process stand-in for the API server. Clones share routes and the
/// request log.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ServerState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Answer every request to `path` with `response`.
    pub fn route(&self, path: &str, response: RawResponse) {
        self.script(path, vec![response]);
    }

    pub fn route_raw(&self, path: &str, response: RawResponse) {
        self.route(path, response);
    }

    pub fn route_with_cookies(&self, path: &str, response: RawResponse, cookies: &[&str]) {
        let response = RawResponse {
            set_cookies: cookies.iter().map(|c| c.to_string()).collect(),
            ..response
        };
        self.route(path, response);
    }

    /// Answer in order; the last response repeats.
    pub fn script(&self, path: &str, responses: Vec<RawResponse>) {
        self.with_state(|s| {
            s.routes.insert(path.to_string(), responses.into());
        });
    }

    /// Answer requests to `path` whose body contains `needle`. Checked before
    /// plain routes, first match wins.
    pub fn route_body(&self, path: &str, needle: &str, response: RawResponse) {
        self.with_state(|s| {
            s.body_routes
                .push((path.to_string(), needle.to_string(), response));
        });
    }

    pub fn client(&self) -> SessionClient {
        self.client_with_config(ApiConfig::default())
    }

    pub fn client_with_config(&self, config: ApiConfig) -> SessionClient {
        self.client_for(config, &Credentials::new("me@example.com", "pw"))
    }

    fn client_for(&self, config: ApiConfig, credentials: &Credentials) -> SessionClient {
        SessionClient::new(
            config,
            credentials,
            Box::new(MockTransport {
                server: self.clone(),
            }),
        )
    }

    pub fn request_count(&self) -> usize {
        self.with_state(|s| s.requests.len())
    }

    pub fn count_path(&self, path: &str) -> usize {
        self.with_state(|s| s.requests.iter().filter(|r| r.path == path).count())
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.with_state(|s| s.requests.last().cloned())
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.with_state(|s| {
            s.requests
                .iter()
                .filter(|r| r.path == path)
                .cloned()
                .collect()
        })
    }

    fn answer(&self, request: RecordedRequest) -> RawResponse {
        self.with_state(|s| {
            let by_body = s
                .body_routes
                .iter()
                .find(|(path, needle, _)| *path == request.path && request.body.contains(needle.as_str()))
                .map(|(_, _, resp)| resp.clone());
            let response = by_body.or_else(|| {
                let queue = s.routes.get_mut(&request.path)?;
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            });
            s.requests.push(request);
            response.unwrap_or(RawResponse {
                status: 404,
                content_type: Some("text/html".into()),
                set_cookies: Vec::new(),
                body: b"not found".to_vec(),
            })
        })
    }
}

struct MockTransport {
    server: MockServer,
}

impl Transport for MockTransport {
    fn send(&self, request: ApiRequest) -> Result<RawResponse> {
        let body = request.body.clone().unwrap_or_default();
        if let Some(progress) = &request.progress {
            if progress.is_aborted() {
                return Err(TransportFailure::Aborted.into());
            }
            progress.begin(body.len() as u64);
            progress.add(body.len() as u64);
        }
        Ok(self.server.answer(RecordedRequest {
            method: request.method.as_str().to_string(),
            path: request.path,
            headers: request.headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        }))
    }
}

/// Opens clients that talk to a `MockServer`.
pub struct MockFactory {
    server: MockServer,
}

impl MockFactory {
    pub fn new(server: &MockServer) -> Self {
        Self {
            server: server.clone(),
        }
    }
}

impl SessionFactory for MockFactory {
    fn open(&self, credentials: &Credentials) -> Result<SessionClient> {
        Ok(self.server.client_for(ApiConfig::default(), credentials))
    }
}

fn xml_response(body: String) -> RawResponse {
    RawResponse {
        status: 200,
        content_type: Some("text/xml; charset=utf-8".into()),
        set_cookies: Vec::new(),
        body: body.into_bytes(),
    }
}

pub fn ok(data: &str) -> RawResponse {
    xml_response(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <PhotoShelterAPI version=\"1.0\"><status>ok</status><data>{}</data></PhotoShelterAPI>",
        data
    ))
}

pub fn fail(class: &str, message: &str) -> RawResponse {
    xml_response(format!(
        "<PhotoShelterAPI version=\"1.0\"><status>error</status>\
         <error><class>{}</class><message>{}</message></error></PhotoShelterAPI>",
        class, message
    ))
}

pub fn session_expired() -> RawResponse {
    fail("SessionError", "Session has expired")
}

pub fn total(n: u64) -> RawResponse {
    ok(&format!("<total>{}</total>", n))
}

fn org_entries(orgs: &[(&str, &str, bool)]) -> String {
    orgs.iter()
        .map(|(id, name, member)| {
            format!(
                "<org><id>{}</id><member>{}</member><name>{}</name></org>",
                id,
                if *member { "t" } else { "f" },
                name
            )
        })
        .collect()
}

/// Login reply; `(id, name, full member)` per organization.
pub fn login_xml(token: &str, orgs: &[(&str, &str, bool)]) -> RawResponse {
    ok(&format!(
        "<token>{}</token>{}<first_name>Ada</first_name><last_name>Lovelace</last_name>",
        token,
        org_entries(orgs)
    ))
}

pub fn login_xml_with_subscriber(token: &str, orgs: &[(&str, &str, bool)], subscriber: bool) -> RawResponse {
    ok(&format!(
        "<token>{}</token>{}<subscriber>{}</subscriber>",
        token,
        org_entries(orgs),
        if subscriber { "t" } else { "f" }
    ))
}

/// Children reply; `(kind, id, name, listed)` per node.
pub fn children_xml(children: &[(&str, &str, &str, bool)]) -> RawResponse {
    let entries: String = children
        .iter()
        .map(|(kind, id, name, listed)| {
            format!(
                "<children><type>{kind}</type><listed>{}</listed>\
                 <{kind}><id>{id}</id><name>{name}</name><mode>everyone</mode>\
                 <description></description></{kind}></children>",
                if *listed { "t" } else { "f" },
            )
        })
        .collect();
    ok(&entries)
}

/// Client on `server`, already logged in with the given organizations.
pub fn logged_in_client(server: &MockServer, orgs: &[(&str, &str, bool)]) -> SessionClient {
    server.route("mem/authenticate", login_xml("tok", orgs));
    let mut client = server.client();
    client.login().unwrap();
    client
}

#[derive(Default)]
pub struct MemoryFiles {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemoryFiles {
    pub fn with(path: &str, data: &[u8]) -> Self {
        let mut files = HashMap::new();
        files.insert(PathBuf::from(path), data.to_vec());
        Self { files }
    }
}

impl FileReader for MemoryFiles {
    fn read_file_for_upload(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| UploaderError::Io(format!("no such file: {}", path.display())))
    }
}

pub fn node(id: &str, parent: &str, kind: NodeKind, name: &str, listed: bool) -> TreeNode {
    TreeNode {
        id: id.to_string(),
        parent_id: parent.to_string(),
        kind,
        name: name.to_string(),
        display_name: name.to_string(),
        listed,
        visibility: "everyone".to_string(),
        description: String::new(),
    }
}

/// Child source answering from a fixed table and logging every fetch.
#[derive(Default)]
pub struct ScriptedSource {
    children: HashMap<String, Vec<TreeNode>>,
    pub calls: Vec<String>,
}

impl ScriptedSource {
    pub fn set(&mut self, id: &str, children: Vec<TreeNode>) {
        self.children.insert(id.to_string(), children);
    }
}

impl ChildSource for ScriptedSource {
    fn fetch_children(&mut self, node_id: &str) -> Result<Vec<TreeNode>> {
        self.calls.push(node_id.to_string());
        self.children
            .get(node_id)
            .cloned()
            .ok_or_else(|| UploaderError::NotFound(format!("no children scripted for {}", node_id)))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingSink {
    fn set_text(&self, text: &str) {
        self.lines.lock().unwrap().push(text.to_string());
    }
}

/// Poll `check` for up to five seconds.
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}
