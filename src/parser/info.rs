//! `info -v` output parser

use once_cell::sync::Lazy;
use regex::Regex;

use crate::info::{ExtraFlowNodeInfo, InfoKind};

static TRIGGER_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Nodes that trigger this node\s*$").unwrap());
static TRIGGER_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+(/\S*)\s+(\S.*?)\s*$").unwrap());
static LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*limit\s+(.+?)\s+\[running\s+(\d+)\s+max\s+(\d+)\]").unwrap());
static TRY_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Current try number:\s*(\d+)").unwrap());
static MAX_TRIES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*SMSTRIES\s*=\s*(\d+)\s*(?:\[([^\]]*)\])?").unwrap());
static METER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*METER\s+(\S+)\s+is\s+(\S+)\s+limits are\s+(.*?)\s*$").unwrap());
static LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*LABEL\s+(\S+)\s+'(.*)'").unwrap());
static REPEAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*repeat\s+(\w+)\s+variable\s+(\S+)\s+(.*?)\s+currently\s+(\S+)").unwrap());

/// Special value that resets a limit instead of altering it
pub const LIMIT_RESET: &str = "reset";

/// Parse the reply of an `info -v <path>` command.
pub fn parse_info_output(output: &str) -> Vec<ExtraFlowNodeInfo> {
    let mut infos = Vec::new();
    let mut in_triggers = false;

    for line in output.lines() {
        if in_triggers {
            if let Some(caps) = TRIGGER_LINE.captures(line) {
                infos.push(ExtraFlowNodeInfo::new(
                    InfoKind::Trigger,
                    &caps[1],
                    Some(caps[2].to_string()),
                    "",
                ));
                continue;
            }
            in_triggers = false;
        }

        if TRIGGER_HEADER.is_match(line) {
            in_triggers = true;
        } else if let Some(caps) = LIMIT.captures(line) {
            infos.push(ExtraFlowNodeInfo::editable(
                InfoKind::Limit,
                &caps[1],
                &caps[3],
                format!(
                    "currently running: {} - Use the '{}' special value to reset things",
                    &caps[2], LIMIT_RESET
                ),
            ));
        } else if let Some(caps) = TRY_NUMBER.captures(line) {
            infos.push(ExtraFlowNodeInfo::new(
                InfoKind::FlowSpecific,
                "CurrentTryNumber",
                Some(caps[1].to_string()),
                "",
            ));
        } else if let Some(caps) = MAX_TRIES.captures(line) {
            let description = match caps.get(2).map(|m| m.as_str().trim()) {
                Some(origin) if !origin.is_empty() => format!("inherited from '{}'", origin),
                _ => "defined on this node".to_string(),
            };
            infos.push(ExtraFlowNodeInfo::editable(
                InfoKind::FlowSpecific,
                "MaxTries",
                &caps[1],
                description,
            ));
        } else if let Some(caps) = METER.captures(line) {
            infos.push(ExtraFlowNodeInfo::editable(
                InfoKind::Meter,
                &caps[1],
                &caps[2],
                format!("limits are {}", &caps[3]),
            ));
        } else if let Some(caps) = LABEL.captures(line) {
            infos.push(ExtraFlowNodeInfo::new(
                InfoKind::Label,
                &caps[1],
                Some(caps[2].to_string()),
                "",
            ));
        } else if let Some(caps) = REPEAT.captures(line) {
            infos.push(ExtraFlowNodeInfo::editable(
                InfoKind::Repeat,
                &caps[2],
                &caps[4],
                format!("type: {}. info: {}", &caps[1], &caps[3]),
            ));
        }
    }

    infos
}
