//! TCP object protocol: one newline-terminated control line per connection.
//!
//! ```text
//! client: STORE:<id>:<size>\n<size bytes>     server: OK\n | ERR <message>\n
//! client: RETRIEVE:<id>\n                     server: OK\n<bytes until close>
//!                                                     | ERR NOTFOUND\n | ERR <message>\n
//! ```
//!
//! STORE must declare its payload length; an unexpected disconnect is then
//! detectable instead of being mistaken for end of data.

use plexvol_core::{validate_id, PlexError, PlexResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest accepted control line, newline included
pub const MAX_LINE: u64 = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Store { id: String, size: u64 },
    Retrieve { id: String },
}

impl Command {
    pub fn parse(line: &str) -> PlexResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.split(':');
        let verb = parts.next().unwrap_or_default();
        let id = parts.next().unwrap_or_default();
        let size = parts.next();
        if parts.next().is_some() {
            return Err(PlexError::Protocol(format!("malformed command: {line:?}")));
        }

        let cmd = match (verb, size) {
            ("STORE", Some(size)) => Command::Store {
                id: id.to_string(),
                size: size
                    .parse()
                    .map_err(|_| PlexError::Protocol(format!("invalid size: {size:?}")))?,
            },
            ("STORE", None) => {
                return Err(PlexError::Protocol(
                    "STORE requires a declared size (STORE:<id>:<size>)".into(),
                ))
            }
            ("RETRIEVE", None) => Command::Retrieve { id: id.to_string() },
            _ => return Err(PlexError::Protocol(format!("unknown command: {line:?}"))),
        };
        validate_id(cmd.id())?;
        Ok(cmd)
    }

    pub fn id(&self) -> &str {
        match self {
            Command::Store { id, .. } | Command::Retrieve { id } => id,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Command::Store { id, size } => format!("STORE:{id}:{size}\n"),
            Command::Retrieve { id } => format!("RETRIEVE:{id}\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    NotFound,
    Err(String),
}

impl Reply {
    pub fn parse(line: &str) -> Self {
        match line.trim_end_matches(['\r', '\n']) {
            "OK" => Reply::Ok,
            "ERR NOTFOUND" => Reply::NotFound,
            other => Reply::Err(other.strip_prefix("ERR ").unwrap_or(other).to_string()),
        }
    }

    pub fn from_error(e: &PlexError) -> Self {
        if e.is_not_found() {
            Reply::NotFound
        } else {
            // keep the reply on one line
            Reply::Err(e.to_string().replace('\n', " "))
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Reply::Ok => "OK\n".into(),
            Reply::NotFound => "ERR NOTFOUND\n".into(),
            Reply::Err(msg) => format!("ERR {msg}\n"),
        }
    }

    /// Turn a server reply into the caller-facing result.
    pub fn into_result(self, id: &str) -> PlexResult<()> {
        match self {
            Reply::Ok => Ok(()),
            Reply::NotFound => Err(PlexError::NotFound(id.to_string())),
            Reply::Err(msg) => Err(PlexError::Protocol(msg)),
        }
    }
}

/// Read one control line, failing on EOF or an over-long line.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> PlexResult<String> {
    let mut line = String::new();
    let n = reader.take(MAX_LINE).read_line(&mut line).await?;
    if n == 0 {
        return Err(PlexError::Protocol("connection closed before control line".into()));
    }
    if !line.ends_with('\n') {
        return Err(PlexError::Protocol(format!(
            "control line not terminated within {MAX_LINE} bytes"
        )));
    }
    Ok(line)
}
