//! # Logs gateways
//!
//! Access to the output files of a task: list the available files, fetch
//! one of them.
//!
//! - [`SmsLogsGateway`] - talks to the scheduler's log server over TCP
//! - [`DemoLogsGateway`] - fake files for the demo backend

mod demo;
mod sms;

pub use demo::DemoLogsGateway;
pub use sms::SmsLogsGateway;

use std::collections::HashSet;
use std::io::Write;

use chrono::{DateTime, Utc};
use regex::Regex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, TflowError};

/// Suffixes of the files produced by a task run
const ALLOWED_SUFFIXES: &str = r"\.(\d+|job\d+|sms|ecf)";

/// One log file as listed by a gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// Access to the log files of tasks
pub trait LogsGateway: Send + Sync {
    /// Every file the gateway knows about for the task at `path` (unfiltered)
    fn list(&self, path: &str) -> Result<Vec<LogFile>>;

    /// Raw content of the `name` log file of the task at `path`
    fn read(&self, path: &str, name: &str) -> Result<Vec<u8>>;

    /// Whether the gateway is reachable
    fn ping(&self) -> bool;

    /// The task's own log files, most recent first
    fn list_files(&self, path: &str) -> Result<Vec<LogFile>> {
        let basename = path.rsplit('/').next().unwrap_or(path);
        let pattern = format!(r"^(.*/)?{}{}$", regex::escape(basename), ALLOWED_SUFFIXES);
        let filter = Regex::new(&pattern).map_err(|e| TflowError::Config(e.to_string()))?;

        let mut found: Vec<LogFile> = self
            .list(path)?
            .into_iter()
            .filter(|f| filter.is_match(&f.name))
            .collect();
        found.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        let mut seen = HashSet::new();
        found.retain(|f| seen.insert(f.name.clone()));
        debug!(
            "Path={}. Found the following log files: {:?}",
            path,
            found.iter().map(|f| f.name.as_str()).collect::<Vec<_>>()
        );
        Ok(found)
    }

    /// Content of a log file as text (undecodable bytes are replaced)
    fn read_to_string(&self, path: &str, name: &str) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.read(path, name)?).into_owned())
    }
}

/// Write a log file into a named temporary file (removed when dropped),
/// e.g. to hand it to an external viewer.
pub fn read_to_tempfile(gateway: &dyn LogsGateway, path: &str, name: &str) -> Result<NamedTempFile> {
    let content = gateway.read(path, name)?;
    let mut file = tempfile::Builder::new()
        .prefix(&format!("log_{}", name))
        .tempfile()?;
    file.write_all(&content)?;
    file.flush()?;
    Ok(file)
}

/// Create a logs gateway by kind
pub fn create_logs_gateway(kind: &str, host: &str, port: u16, paths: Vec<String>) -> Result<Box<dyn LogsGateway>> {
    match kind {
        "demo" => Ok(Box::new(DemoLogsGateway)),
        "sms_log_svr" => Ok(Box::new(SmsLogsGateway::new(host, port, paths))),
        _ => Err(TflowError::UnknownLogsGateway {
            kind: kind.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Listing(Vec<(&'static str, i64)>);

    impl LogsGateway for Listing {
        fn list(&self, _path: &str) -> Result<Vec<LogFile>> {
            Ok(self
                .0
                .iter()
                .map(|(name, ts)| LogFile {
                    name: name.to_string(),
                    modified: Utc.timestamp_opt(*ts, 0).unwrap(),
                })
                .collect())
        }

        fn read(&self, path: &str, name: &str) -> Result<Vec<u8>> {
            Ok(format!("{}:{}", path, name).into_bytes())
        }

        fn ping(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_list_files_filters_and_sorts() {
        let gateway = Listing(vec![
            ("task.sms", 100),
            ("task.1", 300),
            ("task_some_trash", 400),
            ("other.1", 500),
            ("/a/b/task.job1", 200),
            ("task.ecf", 50),
            ("task.1.gz", 600),
        ]);
        let names: Vec<String> = gateway
            .list_files("/suite/fam/task")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["task.1", "/a/b/task.job1", "task.sms", "task.ecf"]);
    }

    #[test]
    fn test_read_to_tempfile() {
        let gateway = Listing(vec![]);
        let file = read_to_tempfile(&gateway, "/s/t", "t.1").unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "/s/t:t.1");
        assert!(file
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("log_t.1"));
    }

    #[test]
    fn test_factory() {
        assert!(create_logs_gateway("demo", "", 0, vec![]).is_ok());
        assert!(create_logs_gateway("sms_log_svr", "localhost", 1, vec!["/".into()]).is_ok());
        let err = create_logs_gateway("ftp", "", 0, vec![]).err().unwrap();
        assert!(matches!(err, TflowError::UnknownLogsGateway { .. }));
    }
}
