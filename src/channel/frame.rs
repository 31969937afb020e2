//! STOMP 1.2 frame codec.
//!
//! A frame is a command line, `name:value` header lines, a blank line, a body
//! and a terminating NUL octet. Header values are escaped (`\\`, `\n`, `\r`,
//! `\c`) on every frame except `CONNECT` and `CONNECTED`.

use std::fmt;
use std::str::FromStr;

use crate::auth::{AUTHORIZATION_HEADER, CredentialCarrier};

/// STOMP commands, client and server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// `CONNECT` or its `STOMP` alias.
    pub fn is_channel_open(&self) -> bool {
        matches!(self, Self::Connect | Self::Stomp)
    }

    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from parsing a frame off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    Empty,
    UnknownCommand(String),
    MalformedHeader(String),
    InvalidEscape(String),
    InvalidContentLength(String),
    MissingNul,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty frame"),
            Self::UnknownCommand(cmd) => write!(f, "Unknown command: {}", cmd),
            Self::MalformedHeader(line) => write!(f, "Malformed header line: {}", line),
            Self::InvalidEscape(value) => write!(f, "Invalid escape sequence in: {}", value),
            Self::InvalidContentLength(value) => write!(f, "Invalid content-length: {}", value),
            Self::MissingNul => write!(f, "Frame is not NUL-terminated"),
        }
    }
}

impl std::error::Error for FrameError {}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Command,
    headers: Vec<(String, String)>,
    body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// An `ERROR` frame with a short `message` header.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Command::Error)
            .with_header("message", message)
            .with_header("content-type", "text/plain")
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Replace every `name` header with a single one set to `value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| n != name);
    }

    pub fn destination(&self) -> Option<&str> {
        self.header("destination")
    }

    pub fn receipt(&self) -> Option<&str> {
        self.header("receipt")
    }

    /// Parse one frame. Heart-beat EOLs before the command are skipped.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.is_empty() {
            return Err(FrameError::Empty);
        }

        let (head, rest) = split_head(raw).ok_or(FrameError::MissingNul)?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command: Command = lines.next().ok_or(FrameError::Empty)?.parse()?;
        let escaped = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if escaped {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(n, _)| n == "content-length")
            .map(|(_, v)| v.as_str());

        let body = match content_length {
            Some(raw) => {
                let len: usize = raw
                    .parse()
                    .map_err(|_| FrameError::InvalidContentLength(raw.to_string()))?;
                let body = rest
                    .get(..len)
                    .ok_or_else(|| FrameError::InvalidContentLength(raw.to_string()))?;
                if !rest[len..].starts_with('\0') {
                    return Err(FrameError::MissingNul);
                }
                body.to_string()
            }
            None => {
                let end = rest.find('\0').ok_or(FrameError::MissingNul)?;
                rest[..end].to_string()
            }
        };

        let frame = Self {
            command,
            headers,
            body,
        };

        Ok(frame)
    }

    /// Serialize to wire text including the NUL terminator.
    pub fn to_wire(&self) -> String {
        let escaped = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escaped {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

impl CredentialCarrier for Frame {
    fn authorization(&self) -> Option<&str> {
        self.header(AUTHORIZATION_HEADER)
    }
}

/// Split at the blank line ending the header block.
fn split_head(raw: &str) -> Option<(&str, &str)> {
    let lf = raw.find("\n\n").map(|idx| (idx, 2));
    let crlf = raw.find("\n\r\n").map(|idx| (idx, 3));
    let (idx, sep) = match (lf, crlf) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => a.or(b)?,
    };
    let head = &raw[..idx];
    Some((head.strip_suffix('\r').unwrap_or(head), &raw[idx + sep..]))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}
