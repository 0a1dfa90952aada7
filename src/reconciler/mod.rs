//! Background account reconciliation
//!
//! The UI thread states what it wants (account, organization) through
//! `request`; one worker thread logs in, switches organization and fetches
//! the folder tree until the actual state matches. Results are published
//! behind the shared mutex and polled by the UI. Only the worker writes
//! `cur_*`, the published lists and the tree.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::api::{Credentials, SessionClient, SessionFactory};
use crate::error::{Result, UploaderError};
use crate::host::{StatusRelay, StatusSink};
use crate::logging::fmt_ms;
use crate::tree::{CollectionTree, SharedSession, SharedTree};

/// Org-list entry standing for the account's own (non-organization) context
pub const SUBSCRIBER_ACCOUNT_LABEL: &str = "- my subscriber account -";

/// First photographer-list entry, meaning "no photographer"
pub const PHOTOGRAPHER_LEAVE_BLANK: &str = "[leave blank]";

const STATUS_LOGIN: &str = "Connecting to PhotoShelter, attempting login...";
const STATUS_ORG_LOGIN: &str = "Attempting organization login...";
const STATUS_SUBSCRIBER: &str = "Entering subscriber account mode...";
const STATUS_QUERY: &str = "Querying available collection folders...";
const STATUS_READY: &str = "Ready.";

/// Last reconciled organization. `Unset` differs from "no organization" so
/// every fresh login runs one organization pass, even when none is wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OrgState {
    Unset,
    Resolved(Option<String>),
}

struct ReconcilerState {
    want_account: Option<Credentials>,
    want_org: Option<String>,
    cur_account: Option<Credentials>,
    cur_org: OrgState,
    orgs_list: Vec<String>,
    tree: Option<SharedTree>,
    photog_list: Vec<String>,
    session: Option<SharedSession>,
    multi_user: bool,
    can_search: bool,
    status: String,
    error: bool,
    quit: bool,
    generation: u64,
}

impl ReconcilerState {
    fn new() -> Self {
        Self {
            want_account: None,
            want_org: None,
            cur_account: None,
            cur_org: OrgState::Unset,
            orgs_list: Vec::new(),
            tree: None,
            photog_list: Vec::new(),
            session: None,
            multi_user: false,
            can_search: false,
            status: String::new(),
            error: false,
            quit: false,
            generation: 0,
        }
    }

    fn account_ready(&self) -> bool {
        self.want_account == self.cur_account
    }

    fn org_ready(&self) -> bool {
        self.cur_org == OrgState::Resolved(self.want_org.clone())
    }

    /// Nothing left to do until the next request.
    fn converged(&self) -> bool {
        self.account_ready() && (self.session.is_none() || (self.org_ready() && self.tree.is_some()))
    }

    fn forget_everything(&mut self) {
        self.cur_account = None;
        self.orgs_list.clear();
        self.multi_user = false;
        self.forget_org_related();
    }

    fn forget_org_related(&mut self) {
        self.cur_org = OrgState::Unset;
        self.tree = None;
        self.photog_list.clear();
        self.can_search = false;
    }
}

struct Shared {
    state: Mutex<ReconcilerState>,
    cv: Condvar,
    relay: Option<StatusRelay>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ReconcilerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, text: &str) {
        self.lock().status = text.to_string();
        self.relay(text);
    }

    fn relay(&self, text: &str) {
        if let Some(relay) = &self.relay {
            relay.update(text);
        }
    }
}

/// Snapshot of what the worker last published
#[derive(Debug, Clone, Default)]
pub struct ReconcileResult {
    pub orgs: Vec<String>,
    /// Same instance on every poll until the next organization pass
    pub tree: Option<SharedTree>,
    pub photographers: Vec<String>,
    /// The organization that was asked for, even when another one was used
    pub current_org: Option<String>,
}

pub struct AccountReconciler {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AccountReconciler {
    pub fn spawn(factory: Arc<dyn SessionFactory>) -> Result<Self> {
        Self::start(factory, None)
    }

    /// Like `spawn`, also pushing every status change to `sink`.
    pub fn spawn_with_sink(factory: Arc<dyn SessionFactory>, sink: Arc<dyn StatusSink>) -> Result<Self> {
        Self::start(factory, Some(StatusRelay::new(sink)))
    }

    fn start(factory: Arc<dyn SessionFactory>, relay: Option<StatusRelay>) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ReconcilerState::new()),
            cv: Condvar::new(),
            relay,
        });

        let handle = thread::Builder::new()
            .name("account-reconciler".to_owned())
            .spawn({
                let shared = shared.clone();
                move || Worker::new(shared, factory).run()
            })
            .map_err(|e| UploaderError::Other(format!("Failed to spawn reconciler thread: {}", e)))?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Record the wanted account and organization. An empty login means no
    /// account. Returns whether the worker was woken.
    pub fn request(&self, login: &str, password: &str, org: Option<&str>) -> bool {
        let account = if login.trim().is_empty() {
            None
        } else {
            Some(Credentials::new(login, password))
        };
        self.set_wanted(account, org.map(str::to_string))
    }

    /// Drop the account; the worker logs out.
    pub fn release_account(&self) -> bool {
        self.set_wanted(None, None)
    }

    fn set_wanted(&self, account: Option<Credentials>, org: Option<String>) -> bool {
        let mut state = self.shared.lock();
        state.want_account = account;
        state.want_org = org;
        let wake = !state.account_ready()
            || (state.want_account.is_some() && (!state.org_ready() || state.tree.is_none()));
        if wake {
            state.generation += 1;
            self.shared.cv.notify_one();
        }
        wake
    }

    /// Make the next `request` refetch even when nothing changed.
    pub fn invalidate_tree(&self) {
        self.shared.lock().tree = None;
    }

    pub fn poll_result(&self) -> ReconcileResult {
        let state = self.shared.lock();
        ReconcileResult {
            orgs: state.orgs_list.clone(),
            tree: state.tree.clone(),
            photographers: state.photog_list.clone(),
            current_org: match &state.cur_org {
                OrgState::Resolved(org) => org.clone(),
                OrgState::Unset => None,
            },
        }
    }

    pub fn current_org(&self) -> Option<String> {
        match &self.shared.lock().cur_org {
            OrgState::Resolved(org) => org.clone(),
            OrgState::Unset => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.shared.lock().error
    }

    pub fn is_ready(&self) -> bool {
        let state = self.shared.lock();
        state.account_ready() && state.org_ready() && state.tree.is_some()
    }

    pub fn status_text(&self) -> String {
        self.shared.lock().status.clone()
    }

    pub fn multi_user_access(&self) -> bool {
        let state = self.shared.lock();
        state.account_ready() && state.multi_user
    }

    pub fn can_make_publicly_searchable(&self) -> bool {
        let state = self.shared.lock();
        state.account_ready() && state.org_ready() && state.can_search
    }

    /// The worker's client, for lazy child fetches from the UI thread. The
    /// worker takes the lock per request, so a fetch waits behind at most one
    /// call of a running pass.
    pub fn session(&self) -> Option<SharedSession> {
        self.shared.lock().session.clone()
    }

    /// Stop after the current pass. An in-flight request is not interrupted.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        state.quit = true;
        self.shared.cv.notify_all();
    }

    /// Close and wait for the worker to exit.
    pub fn join(&self) {
        self.close();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Reconciler thread panicked");
            }
        }
    }
}

impl Drop for AccountReconciler {
    fn drop(&mut self) {
        self.close();
    }
}

/// State owned by the worker thread alone
struct Worker {
    shared: Arc<Shared>,
    factory: Arc<dyn SessionFactory>,
    session: Option<SharedSession>,
    open_account: Option<Credentials>,
    /// Request generation the last job was taken at
    job_generation: u64,
}

impl Worker {
    fn new(shared: Arc<Shared>, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            shared,
            factory,
            session: None,
            open_account: None,
            job_generation: 0,
        }
    }

    fn run(mut self) {
        debug!("Reconciler started");
        while let Some((account, org)) = self.next_job() {
            if let Err(e) = self.reconcile(account, org) {
                error!("Reconciliation failed: {}", e);
                let text = format!("Error: {}", e);
                {
                    let mut state = self.shared.lock();
                    state.error = true;
                    state.status = text.clone();
                }
                self.shared.relay(&text);
            }
        }
        self.close_session();
        debug!("Reconciler stopped");
    }

    /// Block until there is work, then snapshot the wanted state.
    /// `None` means quit.
    fn next_job(&mut self) -> Option<(Option<Credentials>, Option<String>)> {
        let mut state = self.shared.lock();
        loop {
            if state.quit {
                return None;
            }
            if state.error {
                // A request made while the failed pass ran is still pending.
                if state.generation != self.job_generation {
                    state.error = false;
                    continue;
                }
            } else if !state.converged() {
                break;
            }
            let seen = state.generation;
            while state.generation == seen && !state.quit {
                state = self
                    .shared
                    .cv
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.error = false;
        }
        self.job_generation = state.generation;

        if !state.account_ready() {
            state.forget_everything();
        } else if !state.org_ready() {
            state.forget_org_related();
        }
        Some((state.want_account.clone(), state.want_org.clone()))
    }

    fn reconcile(&mut self, account: Option<Credentials>, org: Option<String>) -> Result<()> {
        if account != self.open_account {
            self.switch_account(account)
        } else if let Some(session) = self.session.clone() {
            self.switch_org(&session, org)
        } else {
            Ok(())
        }
    }

    fn switch_account(&mut self, account: Option<Credentials>) -> Result<()> {
        self.close_session();

        let Some(credentials) = account else {
            self.shared.lock().cur_account = None;
            return Ok(());
        };

        self.shared.set_status(STATUS_LOGIN);
        let start = Instant::now();
        let mut client = self.factory.open(&credentials)?;
        client.login()?;

        let mut orgs: Vec<String> = client
            .session()
            .organizations()
            .iter()
            .map(|o| o.name.clone())
            .collect();
        orgs.sort_by_key(|name| name.to_lowercase());
        if client.single_user_access() {
            orgs.insert(0, SUBSCRIBER_ACCOUNT_LABEL.to_string());
        }
        let multi_user = client.multi_user_access();
        info!(
            login = %client.user_login(),
            orgs = orgs.len(),
            elapsed = %fmt_ms(start.elapsed()),
            "Account ready"
        );

        let session: SharedSession = Arc::new(Mutex::new(client));
        self.session = Some(session.clone());
        self.open_account = Some(credentials.clone());

        let mut state = self.shared.lock();
        state.orgs_list = orgs;
        state.multi_user = multi_user;
        state.session = Some(session);
        state.cur_account = Some(credentials);
        Ok(())
    }

    fn switch_org(&mut self, session: &SharedSession, requested: Option<String>) -> Result<()> {
        let orgs_list = self.shared.lock().orgs_list.clone();
        let target = resolve_org(requested.as_deref(), &orgs_list);
        let start = Instant::now();

        match &target {
            Some(name) => {
                self.shared.set_status(STATUS_ORG_LOGIN);
                with_client(session, |client| client.switch_organization(name))?;
            }
            None => {
                self.shared.set_status(STATUS_SUBSCRIBER);
                with_client(session, |client| client.leave_organization())?;
            }
        }

        let tree = if with_client(session, |client| Ok(client.can_query_tree()))? {
            self.shared.set_status(STATUS_QUERY);
            with_client(session, |client| client.query_root_children())?
        } else {
            CollectionTree::empty()
        };

        let mut photographers = Vec::new();
        if with_client(session, |client| Ok(client.can_list_photographers()))? {
            photographers = with_client(session, |client| client.photographers())?
                .iter()
                .map(|p| p.full_name())
                .collect();
            photographers.sort_by_key(|name| name.to_lowercase());
            photographers.insert(0, PHOTOGRAPHER_LEAVE_BLANK.to_string());
        }
        let can_search = with_client(session, |client| Ok(client.can_make_publicly_searchable()))?;

        info!(
            requested = ?requested,
            org = ?target,
            nodes = tree.len(),
            elapsed = %fmt_ms(start.elapsed()),
            "Organization ready"
        );

        {
            let mut state = self.shared.lock();
            state.tree = Some(Arc::new(Mutex::new(tree)));
            state.photog_list = photographers;
            state.can_search = can_search;
            state.cur_org = OrgState::Resolved(requested);
            state.status = STATUS_READY.to_string();
        }
        self.shared.relay(STATUS_READY);
        Ok(())
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Ok(mut client) = session.lock() {
                client.logout();
            }
        }
        self.open_account = None;
        self.shared.lock().session = None;
    }
}

/// Run one client call, holding the session lock only for its duration.
fn with_client<T>(session: &SharedSession, f: impl FnOnce(&mut SessionClient) -> Result<T>) -> Result<T> {
    let mut client = session
        .lock()
        .map_err(|_| UploaderError::Other("session lock poisoned".to_string()))?;
    f(&mut *client)
}

/// Organization to actually enter for a requested name. Names missing from
/// the published list fall back to its first entry; the subscriber label (or
/// an empty list) means no organization.
fn resolve_org(requested: Option<&str>, orgs_list: &[String]) -> Option<String> {
    let pick = match requested {
        Some(name) if orgs_list.iter().any(|o| o == name) => Some(name.to_string()),
        _ => orgs_list.first().cloned(),
    };
    pick.filter(|name| name != SUBSCRIBER_ACCOUNT_LABEL)
}
