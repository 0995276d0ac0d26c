//! Fake log files for the demo backend

use chrono::{TimeZone, Utc};

use super::{LogFile, LogsGateway};
use crate::error::Result;

/// Always reachable gateway serving generated log files
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoLogsGateway;

impl LogsGateway for DemoLogsGateway {
    fn list(&self, path: &str) -> Result<Vec<LogFile>> {
        let basename = path.rsplit('/').next().unwrap_or(path);
        // "_some_trash" is not a log file and must be filtered out by list_files
        let files = [(".1", 10), (".job1", 5), (".sms", 0), ("_some_trash", 0)]
            .into_iter()
            .filter_map(|(suffix, minute)| {
                Some(LogFile {
                    name: format!("{}{}", basename, suffix),
                    modified: Utc.with_ymd_and_hms(2020, 1, 1, 0, minute, 0).single()?,
                })
            })
            .collect();
        Ok(files)
    }

    fn read(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        Ok(format!(
            "This is a demo logfile.\n\nIt has been generated for task:\n{}\n\nand log_file:\n{}\n",
            path, name
        )
        .into_bytes())
    }

    fn ping(&self) -> bool {
        true
    }
}
