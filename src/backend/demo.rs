//! Offline demo backend
//!
//! Generates a fake suite of 80 root nodes. No external tool is needed,
//! which makes it handy for demonstrations and CLI tests.

use std::sync::Arc;

use tracing::debug;

use super::{CommandOutcome, FlowBackend, FlowCommand, StatusSnapshot};
use crate::credentials::Credentials;
use crate::error::{Result, TflowError};
use crate::info::{ExtraFlowNodeInfo, InfoKind};
use crate::logs::{DemoLogsGateway, LogsGateway};
use crate::status::FlowStatus;
use crate::tree::{NodeId, RootFlowNode};

/// What every demo command replies
pub const DEMO_COMMAND_REPLY: &str = "This is a demo run: what did you expect ?";

const ROOTS_COUNT: usize = 80;
const FAMILIES_COUNT: usize = 15;

/// Demo backend with a generated workflow
pub struct DemoBackend {
    suite: String,
}

impl DemoBackend {
    pub fn new(suite: impl Into<String>) -> Self {
        Self { suite: suite.into() }
    }

    fn root_names() -> impl Iterator<Item = String> {
        (0..ROOTS_COUNT).map(|i| format!("{:04}", i))
    }

    fn root_status(index: usize) -> FlowStatus {
        match index {
            0 | 1 => FlowStatus::Complete,
            2 => FlowStatus::Aborted,
            _ => FlowStatus::Suspended,
        }
    }

    /// Families and tasks below `name`. `overall` forces every status.
    fn generic_tree(name: &str, top: Option<FlowStatus>, overall: Option<FlowStatus>) -> RootFlowNode {
        let mut tree = RootFlowNode::new(name, top.or(overall).unwrap_or(FlowStatus::Aborted));
        for i_f in 0..FAMILIES_COUNT {
            let (f_status, ff_status) = match i_f {
                0..=3 => (FlowStatus::Complete, Some(FlowStatus::Complete)),
                4 => (FlowStatus::Aborted, None),
                _ => (FlowStatus::Queued, Some(FlowStatus::Queued)),
            };
            let pick = |fallback: FlowStatus| overall.or(ff_status).unwrap_or(fallback);

            let family = tree.add(
                NodeId::ROOT,
                format!("{}_family{:02}", name, i_f),
                overall.unwrap_or(f_status),
            );
            let extra = tree.add(family, "extra_family", pick(FlowStatus::Active));
            for i_t in 0..3 {
                tree.add(extra, format!("task{:02}", i_t), pick(FlowStatus::Complete));
            }
            tree.add(extra, "task04", pick(FlowStatus::Active));

            for (i_t, fallback) in [
                FlowStatus::Complete,
                FlowStatus::Complete,
                FlowStatus::Complete,
                FlowStatus::Active,
                FlowStatus::Active,
                FlowStatus::Aborted,
                FlowStatus::Submitted,
                FlowStatus::Unknown,
            ]
            .into_iter()
            .enumerate()
            {
                tree.add(family, format!("task{:02}", i_t), pick(fallback));
            }
        }
        tree
    }
}

impl FlowBackend for DemoBackend {
    fn name(&self) -> &str {
        "demo"
    }

    fn suite(&self) -> &str {
        &self.suite
    }

    fn valid_credentials(&self, credentials: Credentials) -> Result<Credentials> {
        Ok(credentials)
    }

    fn credentials_summary(&self, _credentials: &Credentials) -> String {
        "fakeuser@fakeserver".to_string()
    }

    fn retrieve_tree_roots(&self, _credentials: &Credentials) -> Result<RootFlowNode> {
        let mut tree_roots = RootFlowNode::new(self.suite.as_str(), FlowStatus::Active);
        for (i, name) in Self::root_names().enumerate() {
            tree_roots.add(NodeId::ROOT, name, Self::root_status(i));
        }
        debug!("Got tree roots statuses:\n{}", tree_roots);
        Ok(tree_roots)
    }

    fn retrieve_status(&self, _credentials: &Credentials, root: &str) -> Result<StatusSnapshot> {
        let tree = match root {
            "0000" | "0001" => Self::generic_tree(root, None, Some(FlowStatus::Complete)),
            "0002" => Self::generic_tree(root, None, None),
            _ => Self::generic_tree(root, Some(FlowStatus::Suspended), Some(FlowStatus::Queued)),
        };
        Ok(StatusSnapshot {
            tree,
            tree_roots: None,
        })
    }

    fn run_command(&self, _credentials: &Credentials, command: FlowCommand, paths: &[String]) -> CommandOutcome {
        debug!("Demo {} on {:?}", command, paths);
        CommandOutcome::success(DEMO_COMMAND_REPLY)
    }

    fn node_info(&self, _credentials: &Credentials, path: &str) -> Result<Vec<ExtraFlowNodeInfo>> {
        Ok(vec![
            ExtraFlowNodeInfo::editable(
                InfoKind::Limit,
                "running",
                "3",
                "currently running: 1 - Use the 'reset' special value to reset things",
            ),
            ExtraFlowNodeInfo::new(InfoKind::FlowSpecific, "CurrentTryNumber", Some("1".into()), ""),
            ExtraFlowNodeInfo::editable(InfoKind::FlowSpecific, "MaxTries", "2", "defined on this node"),
            ExtraFlowNodeInfo::editable(InfoKind::Meter, "work", "3", "limits are [0 - 6]"),
            ExtraFlowNodeInfo::new(InfoKind::Label, "path", Some(path.to_string()), ""),
        ])
    }

    fn save_node_info(
        &self,
        _credentials: &Credentials,
        path: &str,
        infos: &[ExtraFlowNodeInfo],
    ) -> Result<CommandOutcome> {
        if let Some(info) = infos.iter().find(|i| i.touched() && !i.is_editable()) {
            return Err(TflowError::NotEditable {
                name: info.name().to_string(),
            });
        }
        debug!("Demo save of {} record(s) on {}", infos.len(), path);
        Ok(CommandOutcome::success(DEMO_COMMAND_REPLY))
    }

    fn logs_gateway(&self, _credentials: &Credentials) -> Option<Arc<dyn LogsGateway>> {
        Some(Arc::new(DemoLogsGateway))
    }
}
