//! Persistent session with the interactive scheduler client (`cdp`)
//!
//! One long-lived `cdp` subprocess is driven through its stdin. Every batch of
//! commands is followed by an `echo <sentinel>` so that the end of the reply
//! can be found without relying on the interactive prompt. Two reader threads
//! forward stdout and stderr lines to a channel; reads are bounded by a
//! timeout.
//!
//! A session is not reusable after a fatal error (see
//! [`TflowError::is_fatal_to_session`]): the owner must drop it and open a
//! new one.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wait_timeout::ChildExt;

use crate::credentials::Credentials;
use crate::error::{Result, TflowError};

/// Default timeout for the login exchange
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for any other exchange
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period given to `cdp` after `exit`
const EXIT_TIMEOUT: Duration = Duration::from_secs(2);

static PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:CDP\s*>\s*)+").unwrap());
static ERROR_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*# ERR:").unwrap());
static LOGIN_CONFIRMED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SMS-CLIENT-LOGIN:(\S+)\s+logged into\s+(\S+)").unwrap());
static SUITES_BANNER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Suites defined:").unwrap());

/// Timeouts used by a [`CdpSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub exchange_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }
}

enum Line {
    Out(String),
    Err(String),
}

/// A logged-in `cdp` subprocess
pub struct CdpSession {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<Line>,
    config: SessionConfig,
    summary: String,
    last_exchange: Instant,
    /// `Some` once the subprocess is known to be gone
    exit_code: Option<Option<i32>>,
    suite: Option<String>,
}

impl CdpSession {
    /// Start `cdp` and log in with `credentials`.
    pub fn open(credentials: &Credentials, config: SessionConfig) -> Result<Self> {
        info!("Starting {} for {}", credentials.cdp_path, credentials.summary());
        let mut child = Command::new(&credentials.cdp_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TflowError::Spawn {
                program: credentials.cdp_path.clone(),
                source,
            })?;

        let (tx, lines) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone(), Line::Out);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx, Line::Err);
        }

        let mut session = Self {
            stdin: child.stdin.take(),
            child,
            lines,
            config,
            summary: credentials.summary(),
            last_exchange: Instant::now(),
            exit_code: None,
            suite: None,
        };
        session.login(credentials)?;
        Ok(session)
    }

    fn login(&mut self, credentials: &Credentials) -> Result<()> {
        let command = format!(
            "login {} {} {}",
            credentials.host, credentials.user, credentials.password
        );
        let shown = format!("login {} {} ********", credentials.host, credentials.user);
        let login_error = |details: String| TflowError::Login {
            user: credentials.user.clone(),
            host: credentials.host.clone(),
            details,
        };

        let output = match self.exchange(
            &[command],
            &[shown],
            Some(&credentials.password),
            self.config.connect_timeout,
        ) {
            Ok(output) => output,
            Err(TflowError::Protocol { line, .. }) => return Err(login_error(line)),
            Err(e) => return Err(e),
        };

        let confirmed = output.iter().find_map(|line| LOGIN_CONFIRMED.captures(line));
        match confirmed {
            Some(caps) if caps[1] == credentials.user && caps[2] == credentials.host => {
                debug!("Logged into {} as {}", &caps[2], &caps[1]);
                Ok(())
            }
            Some(caps) => Err(login_error(format!(
                "logged in as {}@{} instead",
                &caps[1], &caps[2]
            ))),
            None => Err(login_error(format!(
                "no login confirmation in: {}",
                output.join(" | ")
            ))),
        }
    }

    /// Check that `suite` exists on the server and register it.
    pub fn register_suite(&mut self, suite: &str) -> Result<()> {
        if self.suite.as_deref() == Some(suite) {
            return Ok(());
        }
        let listing = self.send(&["suites".to_string()])?;
        let known = parse_suites_listing(&listing);
        if !known.iter().any(|s| s == suite) {
            return Err(TflowError::UnknownSuite {
                suite: suite.to_string(),
                known: known.join(", "),
            });
        }
        self.send(&[format!("register {}", suite)])?;
        debug!("Suite {} registered", suite);
        self.suite = Some(suite.to_string());
        Ok(())
    }

    /// Run `commands` as one exchange and return their combined output.
    pub fn send(&mut self, commands: &[String]) -> Result<String> {
        let timeout = self.config.exchange_timeout;
        let lines = self.exchange(commands, commands, None, timeout)?;
        Ok(lines.join("\n"))
    }

    /// Every occurrence of `secret` in the reply is masked before it is
    /// logged or returned.
    fn exchange(
        &mut self,
        commands: &[String],
        shown: &[String],
        secret: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        if let Some(code) = self.exit_code {
            return Err(TflowError::SessionDead { code });
        }

        let sentinel = format!("tflow-end-{}", Uuid::new_v4().simple());
        let mut payload = String::new();
        for command in commands {
            payload.push_str(command);
            payload.push('\n');
        }
        payload.push_str(&format!("echo {}\n", sentinel));

        debug!("[{}] >>> {}", self.summary, shown.join("; "));
        if let Err(e) = self.write(payload.as_bytes()) {
            warn!("[{}] Unable to write to cdp: {}", self.summary, e);
            self.reap();
            return Err(TflowError::SessionDead {
                code: self.exit_code.flatten(),
            });
        }

        let deadline = Instant::now() + timeout;
        let mut output = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(Line::Out(line)) => {
                    let line = PROMPT.replace(&line, "").into_owned();
                    if line.trim() == sentinel {
                        break;
                    }
                    output.push(mask_secret(line, secret));
                }
                Ok(Line::Err(line)) => {
                    let line = mask_secret(line, secret);
                    debug!("[{}] stderr: {}", self.summary, line);
                    output.push(line);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("[{}] No reply within {:?}", self.summary, timeout);
                    return Err(TflowError::Timeout {
                        seconds: timeout.as_secs(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Both readers hit EOF: everything was already drained
                    self.reap();
                    warn!(
                        "[{}] cdp exited (code {:?}) while running: {}",
                        self.summary,
                        self.exit_code.flatten(),
                        shown.join("; ")
                    );
                    break;
                }
            }
        }

        if let Some(line) = output.iter().find(|l| ERROR_LINE.is_match(l)) {
            warn!("[{}] {}", self.summary, line.trim());
            return Err(TflowError::Protocol {
                line: line.trim().to_string(),
                output: output.join("\n"),
            });
        }
        if self.exit_code.is_none() {
            self.last_exchange = Instant::now();
        }
        Ok(output)
    }

    fn write(&mut self, payload: &[u8]) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed"))?;
        stdin.write_all(payload)?;
        stdin.flush()
    }

    fn reap(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        let code = match self.child.wait_timeout(EXIT_TIMEOUT) {
            Ok(Some(status)) => status.code(),
            _ => {
                let _ = self.child.kill();
                self.child.wait().ok().and_then(|status| status.code())
            }
        };
        self.exit_code = Some(code);
    }

    /// Whether the subprocess is still believed to be running
    pub fn is_alive(&self) -> bool {
        self.exit_code.is_none()
    }

    /// Time elapsed since the last successful exchange
    pub fn idle(&self) -> Duration {
        self.last_exchange.elapsed()
    }

    /// The registered suite, if any
    pub fn suite(&self) -> Option<&str> {
        self.suite.as_deref()
    }

    /// `user@host` of this session
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Send `exit` and wait for the subprocess to terminate (never fails).
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        debug!("[{}] Closing the cdp session", self.summary);
        if let Err(e) = self.write(b"exit\n") {
            debug!("[{}] Unable to send exit: {}", self.summary, e);
        }
        self.stdin = None;
        self.reap();
        while let Ok(Line::Out(line) | Line::Err(line)) = self.lines.try_recv() {
            debug!("[{}] <<< {}", self.summary, line);
        }
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forward lines from `stream` until EOF. Undecodable bytes are replaced.
fn spawn_reader<R>(stream: R, tx: Sender<Line>, wrap: fn(String) -> Line)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if tx.send(wrap(line)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn mask_secret(line: String, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() && line.contains(secret) => line.replace(secret, "********"),
        _ => line,
    }
}

/// Suite names listed after the `Suites defined:` banner of a `suites` reply
pub fn parse_suites_listing(output: &str) -> Vec<String> {
    let mut suites = Vec::new();
    let mut in_listing = false;
    for line in output.lines() {
        if SUITES_BANNER.is_match(line) {
            in_listing = true;
            if let Some((_, rest)) = line.split_once(':') {
                suites.extend(rest.split_whitespace().map(str::to_string));
            }
            continue;
        }
        if in_listing {
            if line.trim().is_empty() {
                break;
            }
            suites.extend(line.split_whitespace().map(str::to_string));
        }
    }
    suites
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suites_listing() {
        let output = "# MSG:SMS-CLIENT-LOGIN:groucho logged into localhost\n\
                      Suites defined:\n\
                      \x20  leffe       groucho\n\
                      \x20  kronenbourg\n\
                      \n\
                      something else\n";
        assert_eq!(
            parse_suites_listing(output),
            vec!["leffe", "groucho", "kronenbourg"]
        );
    }

    #[test]
    fn test_suites_listing_on_banner_line() {
        assert_eq!(parse_suites_listing("Suites defined: a b"), vec!["a", "b"]);
        assert!(parse_suites_listing("nothing here").is_empty());
    }

    #[test]
    fn test_prompt_stripping() {
        assert_eq!(PROMPT.replace("CDP> CDP> hello", ""), "hello");
        assert_eq!(PROMPT.replace("CDP > tflow-end", ""), "tflow-end");
        assert_eq!(PROMPT.replace("no prompt", ""), "no prompt");
    }

    #[test]
    fn test_login_confirmation_pattern() {
        let line = "# MSG:SMS-CLIENT-LOGIN:groucho logged into localhost with password [812590]";
        let caps = LOGIN_CONFIRMED.captures(line).unwrap();
        assert_eq!(&caps[1], "groucho");
        assert_eq!(&caps[2], "localhost");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(
            mask_secret("login h u s3cret".to_string(), Some("s3cret")),
            "login h u ********"
        );
        assert_eq!(mask_secret("nothing".to_string(), Some("s3cret")), "nothing");
        assert_eq!(mask_secret("empty".to_string(), Some("")), "empty");
        assert_eq!(mask_secret("s3cret".to_string(), None), "s3cret");
    }

    #[test]
    fn test_spawn_failure() {
        let creds = Credentials::new("/definitely/not/a/cdp", "h", "u", "p");
        let err = CdpSession::open(&creds, SessionConfig::default()).err().unwrap();
        assert!(matches!(err, TflowError::Spawn { .. }));
        assert!(err.is_fatal_to_session());
    }
}
