//! Backend driving a persistent `cdp` session
//!
//! The session is created lazily on first use and kept alive between calls.
//! It is discarded (and re-created on the next call) when the credentials
//! change or when a fatal session error occurs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};

use super::{CommandOutcome, FlowBackend, FlowCommand, StatusSnapshot};
use crate::credentials::Credentials;
use crate::error::{Result, TflowError};
use crate::info::{ExtraFlowNodeInfo, InfoKind};
use crate::logs::{LogsGateway, SmsLogsGateway};
use crate::parser::{build_tree_roots, parse_info_output, parse_status_output, LIMIT_RESET};
use crate::session::{CdpSession, SessionConfig};
use crate::status::FlowStatus;
use crate::tree::RootFlowNode;

static LOGS_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s(]*(SMSHOME|SMSLOGHOST|SMSLOGPORT)\s*=\s*(\S+)").unwrap());

/// The `cdp` command line for each control command
fn command_template(command: FlowCommand) -> &'static str {
    match command {
        FlowCommand::Rerun => "force queued",
        FlowCommand::Execute => "run -fc",
        FlowCommand::Suspend => "suspend",
        FlowCommand::Resume => "resume",
        FlowCommand::Complete => "force -r complete",
        FlowCommand::Requeue => "requeue -f",
        FlowCommand::Cancel => "cancel -y",
    }
}

/// `cdp` commands that apply the edits of `info` on the node at `path`.
///
/// Returns no command when `info` is untouched.
pub fn info_update_commands(path: &str, info: &ExtraFlowNodeInfo) -> Result<Vec<String>> {
    if !info.touched() {
        return Ok(Vec::new());
    }
    let value = info.value().unwrap_or_default().trim();
    let name = info.name();
    let commands = match (info.kind(), name) {
        (InfoKind::FlowSpecific, "MaxTries") => {
            if value.is_empty() || value == LIMIT_RESET {
                vec![format!("alter -r -v {} SMSTRIES", path)]
            } else {
                vec![format!("alter -v {} SMSTRIES {}", path, value)]
            }
        }
        (InfoKind::Limit, _) => {
            if value == LIMIT_RESET {
                vec![format!("reset {}:{}", path, name)]
            } else {
                vec![
                    format!("alter -M {}:{} {}", path, name, value),
                    format!("reset {}:{}", path, name),
                ]
            }
        }
        (InfoKind::Meter, _) => vec![format!("alter -m {}:{} {}", path, name, value)],
        (InfoKind::Repeat, _) => vec![format!("alter -R {}:{} {}", path, name, value)],
        (kind, _) => {
            return Err(TflowError::UnsupportedInfoKind {
                kind: kind.to_string(),
                name: name.to_string(),
            })
        }
    };
    Ok(commands)
}

/// Log server location advertised by the suite variables.
///
/// `SMSHOME` is optional: without it, logs are looked up at the node path.
fn parse_logs_location(output: &str) -> Option<(String, u16, Option<String>)> {
    let variables: HashMap<&str, &str> = output
        .lines()
        .filter_map(|line| LOGS_VARIABLE.captures(line))
        .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .collect();
    let host = variables.get("SMSLOGHOST")?;
    let port = variables.get("SMSLOGPORT")?.parse().ok()?;
    let home = variables.get("SMSHOME").map(|home| home.to_string());
    Some((host.to_string(), port, home))
}

#[derive(Default)]
struct SessionSlot {
    credentials: Option<Credentials>,
    session: Option<CdpSession>,
}

/// Production backend
pub struct CdpBackend {
    suite: String,
    config: SessionConfig,
    slot: Mutex<SessionSlot>,
}

impl CdpBackend {
    pub fn new(suite: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            suite: suite.into(),
            config,
            slot: Mutex::new(SessionSlot::default()),
        }
    }

    /// Run `f` on a logged-in session registered on the suite.
    fn with_session<T>(
        &self,
        credentials: &Credentials,
        f: impl FnOnce(&mut CdpSession) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.slot.lock();

        if slot.credentials.as_ref() != Some(credentials) {
            if let Some(old) = slot.session.take() {
                info!("Credentials changed: closing the session of {}", old.summary());
                old.close();
            }
            slot.credentials = Some(credentials.clone());
        }

        if slot.session.is_none() {
            let mut session = CdpSession::open(credentials, self.config)?;
            session.register_suite(&self.suite)?;
            slot.session = Some(session);
        }

        let result = match slot.session.as_mut() {
            Some(session) => f(session),
            None => Err(TflowError::SessionDead { code: None }),
        };
        if let Err(e) = &result {
            if e.is_fatal_to_session() {
                warn!("Discarding the cdp session: {}", e);
                if let Some(session) = slot.session.take() {
                    session.close();
                }
            }
        }
        result
    }

    fn status_command(&self, root: Option<&str>) -> Vec<String> {
        let mut commands = vec![format!("status /{}", self.suite)];
        if let Some(root) = root {
            commands.push(format!("status -f /{}/{}", self.suite, root));
        }
        commands
    }

    fn outcome(result: Result<String>) -> CommandOutcome {
        match result {
            Ok(output) => CommandOutcome::success(output),
            Err(TflowError::Protocol { output, .. }) => CommandOutcome::failure(output),
            Err(e) => CommandOutcome::failure(format!("Error while running cdp: {}", e)),
        }
    }
}

impl FlowBackend for CdpBackend {
    fn name(&self) -> &str {
        "cdp"
    }

    fn suite(&self) -> &str {
        &self.suite
    }

    fn valid_credentials(&self, credentials: Credentials) -> Result<Credentials> {
        let credentials = Credentials {
            cdp_path: credentials.cdp_path.trim().to_string(),
            host: credentials.host.trim().to_string(),
            user: credentials.user.trim().to_string(),
            password: credentials.password,
        };
        let missing: Vec<&str> = [
            ("cdp_path", credentials.cdp_path.as_str()),
            ("host", credentials.host.as_str()),
            ("user", credentials.user.as_str()),
            ("password", credentials.password.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(key, _)| key)
        .collect();
        if !missing.is_empty() {
            return Err(TflowError::InvalidCredentials {
                details: format!("missing {}", missing.join(", ")),
            });
        }
        Ok(credentials)
    }

    fn retrieve_tree_roots(&self, credentials: &Credentials) -> Result<RootFlowNode> {
        let commands = self.status_command(None);
        let output = self.with_session(credentials, |s| s.send(&commands))?;
        let parsed = parse_status_output(&output, &self.suite)?;
        Ok(build_tree_roots(&self.suite, parsed.iter()))
    }

    fn retrieve_status(&self, credentials: &Credentials, root: &str) -> Result<StatusSnapshot> {
        let commands = self.status_command(Some(root));
        let output = self.with_session(credentials, |s| s.send(&commands))?;
        let mut parsed = parse_status_output(&output, &self.suite)?;
        let tree_roots = build_tree_roots(&self.suite, parsed.iter());
        let tree = parsed.remove(root).unwrap_or_else(|| {
            warn!("No status for {} in the cdp output", root);
            RootFlowNode::new(root, FlowStatus::Unknown)
        });
        Ok(StatusSnapshot {
            tree,
            tree_roots: Some(tree_roots),
        })
    }

    fn run_command(&self, credentials: &Credentials, command: FlowCommand, paths: &[String]) -> CommandOutcome {
        let template = command_template(command);
        let commands: Vec<String> = paths.iter().map(|p| format!("{} {}", template, p)).collect();
        if commands.is_empty() {
            return CommandOutcome::success("");
        }
        debug!("Running {} on {} node(s)", command, commands.len());
        Self::outcome(self.with_session(credentials, |s| s.send(&commands)))
    }

    fn node_info(&self, credentials: &Credentials, path: &str) -> Result<Vec<ExtraFlowNodeInfo>> {
        let command = vec![format!("info -v {}", path)];
        match self.with_session(credentials, |s| s.send(&command)) {
            Ok(output) => Ok(parse_info_output(&output)),
            Err(TflowError::Protocol { line, .. }) => Ok(vec![ExtraFlowNodeInfo::new(
                InfoKind::Error,
                "info",
                Some(line),
                format!("'info -v {}' failed", path),
            )]),
            Err(e) => Err(e),
        }
    }

    fn save_node_info(
        &self,
        credentials: &Credentials,
        path: &str,
        infos: &[ExtraFlowNodeInfo],
    ) -> Result<CommandOutcome> {
        let mut commands = Vec::new();
        for info in infos {
            commands.extend(info_update_commands(path, info)?);
        }
        if commands.is_empty() {
            return Ok(CommandOutcome::success(""));
        }
        Ok(Self::outcome(self.with_session(credentials, |s| s.send(&commands))))
    }

    fn logs_gateway(&self, credentials: &Credentials) -> Option<Arc<dyn LogsGateway>> {
        let command = vec!["info -v /".to_string()];
        let output = match self.with_session(credentials, |s| s.send(&command)) {
            Ok(output) => output,
            Err(e) => {
                warn!("Unable to look for the log server: {}", e);
                return None;
            }
        };
        let (host, port, home) = parse_logs_location(&output)?;
        let gateway = SmsLogsGateway::new(host, port, vec![home.unwrap_or_default()]);
        if gateway.ping() {
            info!("Log server found at {}", gateway.address());
            Some(Arc::new(gateway))
        } else {
            warn!("Log server {} does not answer", gateway.address());
            None
        }
    }

    fn close_if_idle(&self, max_idle: Duration) -> bool {
        let mut slot = self.slot.lock();
        let idle = slot.session.as_ref().map(|session| session.idle());
        match idle {
            Some(idle) if idle >= max_idle => {
                if let Some(session) = slot.session.take() {
                    info!("Closing the cdp session of {} (idle)", session.summary());
                    session.close();
                }
                true
            }
            _ => false,
        }
    }

    fn close(&self) {
        if let Some(session) = self.slot.lock().session.take() {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edited(kind: InfoKind, name: &str, initial: &str, value: &str) -> ExtraFlowNodeInfo {
        let mut info = ExtraFlowNodeInfo::editable(kind, name, initial, "");
        info.set_value(value).unwrap();
        info
    }

    #[test]
    fn test_max_tries_commands() {
        let info = edited(InfoKind::FlowSpecific, "MaxTries", "2", "4");
        assert_eq!(
            info_update_commands("/s/a/b", &info).unwrap(),
            vec!["alter -v /s/a/b SMSTRIES 4"]
        );
        let info = edited(InfoKind::FlowSpecific, "MaxTries", "2", "reset");
        assert_eq!(
            info_update_commands("/s/a/b", &info).unwrap(),
            vec!["alter -r -v /s/a/b SMSTRIES"]
        );
    }

    #[test]
    fn test_limit_commands() {
        let info = edited(InfoKind::Limit, "running", "3", "5");
        assert_eq!(
            info_update_commands("/s/a", &info).unwrap(),
            vec!["alter -M /s/a:running 5", "reset /s/a:running"]
        );
        let info = edited(InfoKind::Limit, "running", "3", "reset");
        assert_eq!(info_update_commands("/s/a", &info).unwrap(), vec!["reset /s/a:running"]);
    }

    #[test]
    fn test_meter_and_repeat_commands() {
        let info = edited(InfoKind::Meter, "work", "3", "4");
        assert_eq!(info_update_commands("/s/a", &info).unwrap(), vec!["alter -m /s/a:work 4"]);
        let info = edited(InfoKind::Repeat, "YMD", "20210616", "20210617");
        assert_eq!(
            info_update_commands("/s/a", &info).unwrap(),
            vec!["alter -R /s/a:YMD 20210617"]
        );
    }

    #[test]
    fn test_untouched_and_unsupported() {
        let info = ExtraFlowNodeInfo::editable(InfoKind::Meter, "work", "3", "");
        assert!(info_update_commands("/s/a", &info).unwrap().is_empty());

        let info = edited(InfoKind::FlowSpecific, "Other", "1", "2");
        let err = info_update_commands("/s/a", &info).unwrap_err();
        assert!(matches!(err, TflowError::UnsupportedInfoKind { .. }));
    }

    #[test]
    fn test_logs_location() {
        let output = "Variables\n    (SMSHOME      = /home/groucho/sms  ) []\n    \
                      (SMSLOGHOST   = loghost  ) []\n    (SMSLOGPORT   = 1234  ) []\n";
        assert_eq!(
            parse_logs_location(output),
            Some(("loghost".to_string(), 1234, Some("/home/groucho/sms".to_string())))
        );
        assert_eq!(
            parse_logs_location("SMSLOGHOST = h\nSMSLOGPORT = 9\n"),
            Some(("h".to_string(), 9, None))
        );
        assert_eq!(parse_logs_location("SMSHOME = /x\nSMSLOGHOST = h\n"), None);
    }

    #[test]
    fn test_invalid_credentials() {
        let backend = CdpBackend::new("groucho", SessionConfig::default());
        let err = backend
            .valid_credentials(Credentials::new("cdp", " ", "u", "p"))
            .unwrap_err();
        assert!(matches!(err, TflowError::InvalidCredentials { ref details } if details.contains("host")));
        let ok = backend
            .valid_credentials(Credentials::new(" cdp ", "h", "u", "p"))
            .unwrap();
        assert_eq!(ok.cdp_path, "cdp");
    }

    #[test]
    fn test_command_on_unreachable_client_is_reported() {
        let backend = CdpBackend::new("groucho", SessionConfig::default());
        let creds = Credentials::new("/definitely/not/a/cdp", "h", "u", "p");
        let outcome = backend.run_command(&creds, FlowCommand::Suspend, &["/groucho/a".to_string()]);
        assert!(!outcome.ok);
        assert!(outcome.output.contains("TFLOW-020"));
    }
}
