//! # Scheduler backends
//!
//! A [`FlowBackend`] knows how to talk to one kind of scheduler. The
//! [`crate::interface::FlowInterface`] façade only deals with this trait.
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | `cdp` | Production, through a persistent `cdp` session |
//! | `demo` | Offline demo and tests, with a fixed 80-root suite |
//!
//! Use [`create_backend`] to instantiate a backend by name:
//!
//! ```rust
//! use tflow::backend::create_backend;
//! use tflow::session::SessionConfig;
//!
//! assert!(create_backend("demo", "groucho", SessionConfig::default()).is_ok());
//! assert!(create_backend("ftp", "groucho", SessionConfig::default()).is_err());
//! ```

mod cdp;
mod demo;

pub use cdp::{info_update_commands, CdpBackend};
pub use demo::{DemoBackend, DEMO_COMMAND_REPLY};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::Credentials;
use crate::error::{Result, TflowError};
use crate::info::ExtraFlowNodeInfo;
use crate::logs::LogsGateway;
use crate::session::SessionConfig;
use crate::tree::RootFlowNode;

// ============================================================================
// COMMANDS
// ============================================================================

/// Control commands that can be sent to a set of nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowCommand {
    Rerun,
    Execute,
    Suspend,
    Resume,
    Complete,
    Requeue,
    Cancel,
}

impl FlowCommand {
    pub const ALL: [FlowCommand; 7] = [
        FlowCommand::Rerun,
        FlowCommand::Execute,
        FlowCommand::Suspend,
        FlowCommand::Resume,
        FlowCommand::Complete,
        FlowCommand::Requeue,
        FlowCommand::Cancel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FlowCommand::Rerun => "rerun",
            FlowCommand::Execute => "execute",
            FlowCommand::Suspend => "suspend",
            FlowCommand::Resume => "resume",
            FlowCommand::Complete => "complete",
            FlowCommand::Requeue => "requeue",
            FlowCommand::Cancel => "cancel",
        }
    }
}

impl fmt::Display for FlowCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlowCommand {
    type Err = TflowError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        FlowCommand::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| TflowError::UnknownCommand { name: s.to_string() })
    }
}

/// What a control command produced. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub output: String,
    pub ok: bool,
}

impl CommandOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ok: true,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ok: false,
        }
    }
}

/// Result of a full status request on one root
#[derive(Debug)]
pub struct StatusSnapshot {
    /// Full tree of the requested root
    pub tree: RootFlowNode,
    /// Tree roots listing fetched along the way, if any
    pub tree_roots: Option<RootFlowNode>,
}

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// A scheduler the flow interface can talk to
///
/// Paths given to the node operations are absolute (`/suite/root/...`).
pub trait FlowBackend: Send + Sync {
    /// Backend name (e.g. "cdp", "demo")
    fn name(&self) -> &str;

    /// The suite this backend works on
    fn suite(&self) -> &str;

    /// Validate (and normalize) user supplied credentials
    fn valid_credentials(&self, credentials: Credentials) -> Result<Credentials>;

    /// Short human readable description of the credentials
    fn credentials_summary(&self, credentials: &Credentials) -> String {
        credentials.summary()
    }

    /// Status of the suite's root nodes only
    fn retrieve_tree_roots(&self, credentials: &Credentials) -> Result<RootFlowNode>;

    /// Full status of one root node
    fn retrieve_status(&self, credentials: &Credentials, root: &str) -> Result<StatusSnapshot>;

    /// Apply `command` to every node of `paths`
    fn run_command(&self, credentials: &Credentials, command: FlowCommand, paths: &[String]) -> CommandOutcome;

    /// Extra information on one node
    fn node_info(&self, credentials: &Credentials, path: &str) -> Result<Vec<ExtraFlowNodeInfo>>;

    /// Push the touched `infos` of one node back to the scheduler
    fn save_node_info(
        &self,
        credentials: &Credentials,
        path: &str,
        infos: &[ExtraFlowNodeInfo],
    ) -> Result<CommandOutcome>;

    /// A gateway to the job output files, when one is reachable
    fn logs_gateway(&self, credentials: &Credentials) -> Option<Arc<dyn LogsGateway>>;

    /// Release resources if nothing happened for `max_idle`. Returns `true`
    /// when something was released.
    fn close_if_idle(&self, _max_idle: Duration) -> bool {
        false
    }

    /// Release every resource held by the backend
    fn close(&self) {}
}

/// Create a backend by name
pub fn create_backend(name: &str, suite: &str, session: SessionConfig) -> Result<Arc<dyn FlowBackend>> {
    match name.to_lowercase().as_str() {
        "cdp" => Ok(Arc::new(CdpBackend::new(suite, session))),
        "demo" => Ok(Arc::new(DemoBackend::new(suite))),
        _ => Err(TflowError::Config(format!(
            "Unknown backend: '{}'. Available: cdp, demo",
            name
        ))),
    }
}
