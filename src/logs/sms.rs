//! Client for the scheduler's log server
//!
//! One command per TCP connection: the request line is sent, the write half
//! is shut down and the whole reply is read until the server closes.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use chrono::DateTime;
use tracing::{debug, warn};

use super::{LogFile, LogsGateway};
use crate::error::{Result, TflowError};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway to a `sms_log_svr` instance
pub struct SmsLogsGateway {
    host: String,
    port: u16,
    /// Directories where the job outputs may be stored
    paths: Vec<String>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl SmsLogsGateway {
    pub fn new(host: impl Into<String>, port: u16, paths: Vec<String>) -> Self {
        Self {
            host: host.into(),
            port,
            paths,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn error(&self, details: impl Into<String>) -> TflowError {
        TflowError::LogServer {
            host: self.host.clone(),
            port: self.port,
            details: details.into(),
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.error(format!("cannot resolve: {}", e)))?
            .collect();
        let mut last_error = self.error("no address");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = self.error(format!("{}: {}", addr, e)),
            }
        }
        Err(last_error)
    }

    fn request(&self, command: &str) -> Result<Vec<u8>> {
        debug!("[{}] {}", self.address(), command);
        let mut stream = self.connect()?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        stream
            .write_all(format!("{}\n", command).as_bytes())
            .map_err(|e| self.error(e.to_string()))?;
        // Some servers wait for the end of the request
        let _ = stream.shutdown(Shutdown::Write);

        let mut reply = Vec::new();
        stream
            .read_to_end(&mut reply)
            .map_err(|e| self.error(e.to_string()))?;
        Ok(reply)
    }

    fn full_path(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

/// Rows of a `list` reply: the sixth column is an epoch, the last one a file name
fn parse_listing(reply: &str) -> Vec<LogFile> {
    reply
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 7 {
                return None;
            }
            let epoch: i64 = tokens[5].parse().ok()?;
            let modified = DateTime::from_timestamp(epoch, 0)?;
            let name = tokens[tokens.len() - 1];
            let name = name.rsplit('/').next().unwrap_or(name);
            Some(LogFile {
                name: name.to_string(),
                modified,
            })
        })
        .collect()
}

impl LogsGateway for SmsLogsGateway {
    fn list(&self, path: &str) -> Result<Vec<LogFile>> {
        let mut files = Vec::new();
        for base in &self.paths {
            let reply = self.request(&format!("list {}.0", Self::full_path(base, path)))?;
            files.extend(parse_listing(&String::from_utf8_lossy(&reply)));
            if !files.is_empty() {
                break;
            }
        }
        Ok(files)
    }

    fn read(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        let directory = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        for base in &self.paths {
            let target = Self::full_path(&Self::full_path(base, directory), name);
            let reply = self.request(&format!("get {}", target))?;
            if !reply.is_empty() {
                return Ok(reply);
            }
        }
        Err(self.error(format!("{} not found for {}", name, path)))
    }

    fn ping(&self) -> bool {
        match self.connect() {
            Ok(_) => true,
            Err(e) => {
                warn!("Ping failed: {}", e);
                false
            }
        }
    }
}
