//! # Flow interface
//!
//! The façade used by front-ends. It caches the tree roots listing and the
//! full status of every root that was looked at, refreshes them on demand
//! and notifies observers when something actually changed.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tflow::{Credentials, DemoBackend, FlowInterface};
//!
//! let mut flow = FlowInterface::new(Arc::new(DemoBackend::new("demo")), Duration::from_secs(5));
//! flow.set_credentials(Credentials::new("", "", "", "")).unwrap();
//! assert_eq!(flow.tree_roots().unwrap().len(), 80);
//! assert!(flow.full_status("0002").is_ok());
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::backend::{CommandOutcome, FlowBackend, FlowCommand};
use crate::credentials::Credentials;
use crate::error::{Result, TflowError};
use crate::info::ExtraFlowNodeInfo;
use crate::logs::LogsGateway;
use crate::observer::{ListenerId, Observer, Subject};
use crate::tree::RootFlowNode;

/// Default minimal age of a cached status before it is fetched again
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// What changed in the flow interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// The list of root nodes (or their statuses) changed
    TreeRootsChanged,
    /// The full status of `root` changed
    FullStatusChanged { root: String },
}

/// Cached access to a suite through a [`FlowBackend`]
pub struct FlowInterface {
    backend: Arc<dyn FlowBackend>,
    suite: String,
    min_refresh_interval: Duration,
    credentials: Option<Credentials>,
    tree_roots: Option<RootFlowNode>,
    full_statuses: HashMap<String, RootFlowNode>,
    logs: Option<Option<Arc<dyn LogsGateway>>>,
    events: Subject<FlowEvent>,
}

impl FlowInterface {
    pub fn new(backend: Arc<dyn FlowBackend>, min_refresh_interval: Duration) -> Self {
        Self {
            suite: backend.suite().to_string(),
            backend,
            min_refresh_interval,
            credentials: None,
            tree_roots: None,
            full_statuses: HashMap::new(),
            logs: None,
            events: Subject::new(),
        }
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn min_refresh_interval(&self) -> Duration {
        self.min_refresh_interval
    }

    pub fn backend(&self) -> &Arc<dyn FlowBackend> {
        &self.backend
    }

    // ─────────────────────────────────────────────────────────────
    // Credentials
    // ─────────────────────────────────────────────────────────────

    /// Validate and store the credentials used for every later request.
    pub fn set_credentials(&mut self, credentials: Credentials) -> Result<()> {
        let credentials = self.backend.valid_credentials(credentials)?;
        if self.credentials.as_ref() != Some(&credentials) {
            self.logs = None;
        }
        self.credentials = Some(credentials);
        Ok(())
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or(TflowError::CredentialsNotSet)
    }

    /// `user@host` style summary, empty until credentials are set
    pub fn credentials_summary(&self) -> String {
        self.credentials
            .as_ref()
            .map(|c| self.backend.credentials_summary(c))
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────

    pub fn subscribe<O: Observer<FlowEvent> + 'static>(&self, observer: &Arc<O>) -> ListenerId {
        self.events.attach(observer)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.detach(id)
    }

    // ─────────────────────────────────────────────────────────────
    // Statuses
    // ─────────────────────────────────────────────────────────────

    /// The suite's root nodes, fetched on first access.
    pub fn tree_roots(&mut self) -> Result<&RootFlowNode> {
        if self.tree_roots.is_none() {
            let fetched = self.backend.retrieve_tree_roots(self.credentials()?)?;
            self.set_tree_roots(fetched);
        }
        match &self.tree_roots {
            Some(roots) if !roots.is_empty() => Ok(roots),
            _ => Err(TflowError::EmptySuite {
                suite: self.suite.clone(),
            }),
        }
    }

    /// Full status tree of the `root` root node, fetched on first access.
    ///
    /// The tree is mutable so that front-ends can flag, fold or focus nodes;
    /// these choices survive later refreshes.
    pub fn full_status(&mut self, root: &str) -> Result<&mut RootFlowNode> {
        if !self.tree_roots()?.contains(root) {
            return Err(TflowError::UnknownRoot {
                path: root.to_string(),
            });
        }
        if !self.full_statuses.contains_key(root) {
            self.fetch_full_status(root)?;
        }
        self.full_statuses
            .get_mut(root)
            .ok_or_else(|| TflowError::UnknownRoot {
                path: root.to_string(),
            })
    }

    /// Whether the full status of `root` is cached
    pub fn in_cache(&self, root: &str) -> bool {
        self.full_statuses.contains_key(root)
    }

    /// The cached full status of `root`, without fetching anything
    pub fn cached_status(&self, root: &str) -> Option<&RootFlowNode> {
        self.full_statuses.get(root)
    }

    /// Refresh the status of `root` (and the tree roots) when the cached
    /// versions are older than the minimal refresh interval, or always when
    /// `force` is set.
    pub fn refresh(&mut self, root: &str, force: bool) -> Result<()> {
        let stale = |tree: Option<&RootFlowNode>, interval: Duration| {
            tree.map_or(true, |t| t.age() >= interval)
        };

        if !self.tree_roots()?.contains(root) {
            return Err(TflowError::UnknownRoot {
                path: root.to_string(),
            });
        }
        let mut roots_fetched = false;
        if force || stale(self.full_statuses.get(root), self.min_refresh_interval) {
            roots_fetched = self.fetch_full_status(root)?;
        }
        if !roots_fetched && (force || stale(self.tree_roots.as_ref(), self.min_refresh_interval)) {
            let fetched = self.backend.retrieve_tree_roots(self.credentials()?)?;
            self.set_tree_roots(fetched);
        }
        Ok(())
    }

    /// Returns whether the tree roots came along in the same exchange.
    fn fetch_full_status(&mut self, root: &str) -> Result<bool> {
        debug!("Fetching the full status of {}", root);
        let snapshot = self.backend.retrieve_status(self.credentials()?, root)?;
        let with_roots = snapshot.tree_roots.is_some();
        if let Some(tree_roots) = snapshot.tree_roots {
            self.set_tree_roots(tree_roots);
        }
        self.set_full_status(root, snapshot.tree);
        Ok(with_roots)
    }

    fn set_tree_roots(&mut self, mut fetched: RootFlowNode) {
        if let Some(current) = self.tree_roots.as_mut() {
            if *current == fetched {
                current.touch();
                return;
            }
            fetched.ingest(current);
        }
        self.tree_roots = Some(fetched);
        self.events.notify(&FlowEvent::TreeRootsChanged);
    }

    fn set_full_status(&mut self, root: &str, mut fetched: RootFlowNode) {
        if let Some(current) = self.full_statuses.get_mut(root) {
            if *current == fetched {
                current.touch();
                return;
            }
            fetched.ingest(current);
        }
        self.full_statuses.insert(root.to_string(), fetched);
        self.events.notify(&FlowEvent::FullStatusChanged {
            root: root.to_string(),
        });
    }

    // ─────────────────────────────────────────────────────────────
    // Commands and node information
    // ─────────────────────────────────────────────────────────────

    fn absolute_path(&self, root: &str, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("/{}/{}", self.suite, root)
        } else {
            format!("/{}/{}/{}", self.suite, root, path)
        }
    }

    /// Run `command` on `paths` (relative to the `root` root node).
    pub fn command_gateway(&self, command: FlowCommand, root: &str, paths: &[String]) -> Result<CommandOutcome> {
        let credentials = self.credentials()?;
        let absolute: Vec<String> = paths.iter().map(|p| self.absolute_path(root, p)).collect();
        info!("{} {}", command, absolute.join(" "));
        Ok(self.backend.run_command(credentials, command, &absolute))
    }

    /// Extra information on the node at `path` (relative to `root`)
    pub fn node_info(&self, root: &str, path: &str) -> Result<Vec<ExtraFlowNodeInfo>> {
        let credentials = self.credentials()?;
        self.backend.node_info(credentials, &self.absolute_path(root, path))
    }

    /// Push the edited records of `infos` back to the scheduler.
    pub fn save_node_info(&self, root: &str, path: &str, infos: &[ExtraFlowNodeInfo]) -> Result<CommandOutcome> {
        let credentials = self.credentials()?;
        let touched: Vec<ExtraFlowNodeInfo> = infos.iter().filter(|i| i.touched()).cloned().collect();
        if touched.is_empty() {
            return Ok(CommandOutcome::success(""));
        }
        self.backend
            .save_node_info(credentials, &self.absolute_path(root, path), &touched)
    }

    /// The logs gateway, looked up once per set of credentials
    pub fn logs_gateway(&mut self) -> Result<Option<Arc<dyn LogsGateway>>> {
        if self.logs.is_none() {
            let gateway = self.backend.logs_gateway(self.credentials()?);
            self.logs = Some(gateway);
        }
        Ok(self.logs.clone().flatten())
    }

    /// Absolute scheduler path of `path` (relative to `root`)
    pub fn scheduler_path(&self, root: &str, path: &str) -> String {
        self.absolute_path(root, path)
    }

    /// Close the backend's resources
    pub fn close(&self) {
        self.backend.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StatusSnapshot;
    use crate::info::InfoKind;
    use crate::status::FlowStatus;
    use crate::tree::NodeId;
    use parking_lot::Mutex;

    /// Backend serving scripted statuses and recording commands
    #[derive(Default)]
    struct ScriptedBackend {
        status: Mutex<FlowStatus>,
        fetches: Mutex<usize>,
        root_fetches: Mutex<usize>,
        roots_in_snapshot: Mutex<bool>,
        commands: Mutex<Vec<(FlowCommand, Vec<String>)>>,
        saved: Mutex<Vec<ExtraFlowNodeInfo>>,
    }

    impl ScriptedBackend {
        fn set_status(&self, status: FlowStatus) {
            *self.status.lock() = status;
        }

        fn roots(&self) -> RootFlowNode {
            let mut roots = RootFlowNode::new("s", FlowStatus::Unknown);
            roots.add(NodeId::ROOT, "r", *self.status.lock());
            roots
        }
    }

    impl FlowBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn suite(&self) -> &str {
            "s"
        }

        fn valid_credentials(&self, credentials: Credentials) -> Result<Credentials> {
            if credentials.user.is_empty() {
                return Err(TflowError::InvalidCredentials { details: "user".into() });
            }
            Ok(credentials)
        }

        fn retrieve_tree_roots(&self, _credentials: &Credentials) -> Result<RootFlowNode> {
            *self.root_fetches.lock() += 1;
            Ok(self.roots())
        }

        fn retrieve_status(&self, _credentials: &Credentials, root: &str) -> Result<StatusSnapshot> {
            *self.fetches.lock() += 1;
            let status = *self.status.lock();
            let mut tree = RootFlowNode::new(root, status);
            let f = tree.add(NodeId::ROOT, "f", status);
            tree.add(f, "t", status);
            let g = tree.add(NodeId::ROOT, "g", status);
            tree.add(g, "u", FlowStatus::Complete);
            tree.add(NodeId::ROOT, "q", FlowStatus::Queued);
            let tree_roots = self.roots_in_snapshot.lock().then(|| self.roots());
            Ok(StatusSnapshot { tree, tree_roots })
        }

        fn run_command(&self, _credentials: &Credentials, command: FlowCommand, paths: &[String]) -> CommandOutcome {
            self.commands.lock().push((command, paths.to_vec()));
            CommandOutcome::success("done")
        }

        fn node_info(&self, _credentials: &Credentials, path: &str) -> Result<Vec<ExtraFlowNodeInfo>> {
            Ok(vec![ExtraFlowNodeInfo::new(InfoKind::Label, "path", Some(path.into()), "")])
        }

        fn save_node_info(
            &self,
            _credentials: &Credentials,
            _path: &str,
            infos: &[ExtraFlowNodeInfo],
        ) -> Result<CommandOutcome> {
            self.saved.lock().extend(infos.iter().cloned());
            Ok(CommandOutcome::success("saved"))
        }

        fn logs_gateway(&self, _credentials: &Credentials) -> Option<Arc<dyn LogsGateway>> {
            None
        }
    }

    #[derive(Default)]
    struct EventLog(Mutex<Vec<FlowEvent>>);

    impl Observer<FlowEvent> for EventLog {
        fn notify(&self, event: &FlowEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn setup() -> (Arc<ScriptedBackend>, FlowInterface) {
        let backend = Arc::new(ScriptedBackend::default());
        backend.set_status(FlowStatus::Active);
        let mut flow = FlowInterface::new(backend.clone(), Duration::from_secs(3600));
        flow.set_credentials(Credentials::new("cdp", "h", "u", "p")).unwrap();
        (backend, flow)
    }

    #[test]
    fn test_credentials_are_required() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut flow = FlowInterface::new(backend, DEFAULT_MIN_REFRESH_INTERVAL);
        assert!(matches!(flow.tree_roots(), Err(TflowError::CredentialsNotSet)));
        assert_eq!(flow.credentials_summary(), "");
        assert!(flow.set_credentials(Credentials::new("cdp", "h", "", "p")).is_err());
        flow.set_credentials(Credentials::new("cdp", "h", "u", "p")).unwrap();
        assert_eq!(flow.credentials_summary(), "u@h");
    }

    #[test]
    fn test_unknown_root() {
        let (_, mut flow) = setup();
        let err = flow.full_status("nope").unwrap_err();
        assert!(matches!(err, TflowError::UnknownRoot { ref path } if path == "nope"));
    }

    #[test]
    fn test_refresh_unknown_root() {
        let (backend, mut flow) = setup();
        let events = Arc::new(EventLog::default());
        flow.subscribe(&events);

        let err = flow.refresh("bogus", true).unwrap_err();
        assert!(matches!(err, TflowError::UnknownRoot { ref path } if path == "bogus"));
        assert!(!flow.in_cache("bogus"));
        assert_eq!(*backend.fetches.lock(), 0);
        assert_eq!(*events.0.lock(), vec![FlowEvent::TreeRootsChanged]);
    }

    #[test]
    fn test_forced_refresh_reuses_roots_from_status_exchange() {
        let (backend, mut flow) = setup();
        *backend.roots_in_snapshot.lock() = true;
        flow.full_status("r").unwrap();
        assert_eq!(*backend.root_fetches.lock(), 1);

        flow.refresh("r", true).unwrap();
        flow.refresh("r", true).unwrap();
        assert_eq!(*backend.fetches.lock(), 3);
        assert_eq!(*backend.root_fetches.lock(), 1);

        // Without roots in the snapshot, the list is fetched on its own
        *backend.roots_in_snapshot.lock() = false;
        flow.refresh("r", true).unwrap();
        assert_eq!(*backend.root_fetches.lock(), 2);
    }

    #[test]
    fn test_full_status_is_cached() {
        let (backend, mut flow) = setup();
        assert!(!flow.in_cache("r"));
        flow.full_status("r").unwrap();
        flow.full_status("r").unwrap();
        assert!(flow.in_cache("r"));
        assert_eq!(*backend.fetches.lock(), 1);

        // Not stale yet
        flow.refresh("r", false).unwrap();
        assert_eq!(*backend.fetches.lock(), 1);

        flow.refresh("r", true).unwrap();
        assert_eq!(*backend.fetches.lock(), 2);
    }

    #[test]
    fn test_events_only_on_change() {
        let (backend, mut flow) = setup();
        let events = Arc::new(EventLog::default());
        flow.subscribe(&events);

        flow.full_status("r").unwrap();
        assert_eq!(
            *events.0.lock(),
            vec![
                FlowEvent::TreeRootsChanged,
                FlowEvent::FullStatusChanged { root: "r".into() }
            ]
        );

        events.0.lock().clear();
        flow.refresh("r", true).unwrap();
        assert!(events.0.lock().is_empty(), "identical statuses are not a change");

        backend.set_status(FlowStatus::Aborted);
        flow.refresh("r", true).unwrap();
        assert_eq!(
            *events.0.lock(),
            vec![
                FlowEvent::FullStatusChanged { root: "r".into() },
                FlowEvent::TreeRootsChanged
            ]
        );
    }

    #[test]
    fn test_flags_survive_refresh() {
        let (backend, mut flow) = setup();
        {
            let tree = flow.full_status("r").unwrap();
            let q = tree.resolve_path("q").unwrap();
            tree.set_flagged(q, true);
        }
        backend.set_status(FlowStatus::Aborted);
        flow.refresh("r", true).unwrap();
        let tree = flow.full_status("r").unwrap();
        assert_eq!(tree.status(), FlowStatus::Aborted);
        assert_eq!(tree.flagged_paths(), vec!["q".to_string()]);
    }

    #[test]
    fn test_fold_and_focus_across_refresh() {
        let (backend, mut flow) = setup();
        {
            let tree = flow.full_status("r").unwrap();
            let f = tree.resolve_path("f").unwrap();
            let g = tree.resolve_path("g").unwrap();
            let q = tree.resolve_path("q").unwrap();
            tree.set_user_expanded(f, false);
            tree.set_user_expanded(g, true);
            tree.set_focused(q);
            assert!(tree.blink_paths().is_empty());
        }

        // f and g change status and f/t becomes a new aborted leaf
        backend.set_status(FlowStatus::Aborted);
        flow.refresh("r", true).unwrap();
        {
            let tree = flow.full_status("r").unwrap();
            let f = tree.root().child("f").unwrap();
            let g = tree.root().child("g").unwrap();
            assert_eq!(f.user_expanded(), None, "a fold is pinned to the old status");
            assert!(f.is_expanded());
            assert_eq!(g.user_expanded().map(|ue| ue.expanded), Some(true));
            assert_eq!(tree.focused_path(), None);

            let q = tree.resolve_path("q").unwrap();
            tree.set_focused(q);
        }

        // Nothing new goes wrong: the focus stays
        backend.set_status(FlowStatus::Suspended);
        flow.refresh("r", true).unwrap();
        let tree = flow.full_status("r").unwrap();
        assert_eq!(tree.focused_path().as_deref(), Some("q"));
        assert_eq!(tree.status(), FlowStatus::Suspended);
    }

    #[test]
    fn test_command_paths_are_absolute() {
        let (backend, flow) = setup();
        let outcome = flow
            .command_gateway(FlowCommand::Suspend, "r", &["f/t".to_string(), "".to_string()])
            .unwrap();
        assert!(outcome.ok);
        assert_eq!(
            *backend.commands.lock(),
            vec![(
                FlowCommand::Suspend,
                vec!["/s/r/f/t".to_string(), "/s/r".to_string()]
            )]
        );
    }

    #[test]
    fn test_only_touched_infos_are_saved() {
        let (backend, flow) = setup();
        let infos = flow.node_info("r", "f/t").unwrap();
        assert_eq!(infos[0].value(), Some("/s/r/f/t"));

        let untouched = ExtraFlowNodeInfo::editable(InfoKind::Meter, "work", "3", "");
        let mut touched = ExtraFlowNodeInfo::editable(InfoKind::Meter, "other", "3", "");
        touched.set_value("4").unwrap();

        let outcome = flow.save_node_info("r", "f/t", &[untouched.clone()]).unwrap();
        assert_eq!(outcome.output, "");
        assert!(backend.saved.lock().is_empty());

        flow.save_node_info("r", "f/t", &[untouched, touched]).unwrap();
        let saved = backend.saved.lock();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name(), "other");
    }
}
