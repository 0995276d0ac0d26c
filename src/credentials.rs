//! Scheduler credentials and the `~/.smsrc` password file
//!
//! The password file is a plain list of `host user password` lines. It is
//! refused unless it is a regular file with no permission bit for the group
//! or others.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, TflowError};

/// Everything needed to log into the scheduler
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Path to the interactive client program
    pub cdp_path: String,
    pub host: String,
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        cdp_path: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            cdp_path: cdp_path.into(),
            host: host.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// `user@host`
    pub fn summary(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

// Never print the password
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cdp_path", &self.cdp_path)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

struct RcEntry {
    host: String,
    user: String,
    password: String,
}

/// Parsed `~/.smsrc` file
pub struct SmsRc {
    entries: Vec<RcEntry>,
}

impl SmsRc {
    pub fn default_location() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".smsrc"))
    }

    /// Read `rc_file`, or the default location when `None`.
    ///
    /// A missing default file simply yields no entries; a missing explicit
    /// file is an error.
    pub fn load(rc_file: Option<&Path>) -> Result<Self> {
        let path = match rc_file {
            Some(path) => path.to_path_buf(),
            None => match Self::default_location() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self { entries: Vec::new() }),
            },
        };
        let display = path.display().to_string();

        let metadata = fs::metadata(&path).map_err(|_| TflowError::RcFileNotFound {
            path: display.clone(),
        })?;
        if !metadata.is_file() || !private_mode(&metadata) {
            return Err(TflowError::RcPermissions { path: display });
        }

        let content = fs::read_to_string(&path)?;
        Ok(Self::parse(&content))
    }

    fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let items: Vec<&str> = line.split_whitespace().collect();
            match items.as_slice() {
                [] => {}
                [host, user, password, ..] => {
                    debug!("Credentials found for host={} with user={}", host, user);
                    entries.push(RcEntry {
                        host: host.to_string(),
                        user: user.to_string(),
                        password: password.to_string(),
                    });
                }
                _ => warn!("Ignoring incomplete credentials line {}", line_no + 1),
            }
        }
        Self { entries }
    }

    /// Password for `user` on the first stored host starting with `host`
    pub fn password(&self, host: &str, user: &str) -> Result<&str> {
        self.entries
            .iter()
            .find(|e| e.host.starts_with(host) && e.user == user)
            .map(|e| e.password.as_str())
            .ok_or_else(|| TflowError::NoCredentials {
                host: host.to_string(),
                user: user.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(unix)]
fn private_mode(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o077 == 0
}

#[cfg(not(unix))]
fn private_mode(_metadata: &fs::Metadata) -> bool {
    true
}
