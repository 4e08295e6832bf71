//! Frame model, encoder and parser.
//!
//! A frame on the wire is `COMMAND\nname:value\n...\n\nbody\0`. Heart-beats are
//! bare EOLs and may appear between frames or as a whole WebSocket message.

use std::fmt;
use thiserror::Error;

/// A single heart-beat as sent on the wire.
pub const HEARTBEAT: &str = "\n";

/// Errors produced while decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StompError {
    #[error("empty frame")]
    Empty,

    #[error("frame ends before the header block is complete")]
    Incomplete,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("frame body is not NUL terminated")]
    MissingNull,

    #[error("invalid content-length: {0}")]
    BadContentLength(String),

    #[error("invalid escape sequence in header: {0}")]
    BadEscape(String),

    #[error("invalid heart-beat header: {0}")]
    BadHeartBeat(String),
}

/// STOMP commands, client and server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            _ => return None,
        };
        Some(command)
    }

    /// CONNECT and CONNECTED headers are never escaped (STOMP 1.2 section 2.2).
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header (builder style).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body (builder style).
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. Repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// ERROR frame with a short `message` header and a longer body.
    pub fn error(message: &str, details: &str) -> Self {
        Frame::new(Command::Error)
            .header("message", message)
            .header("content-type", "text/plain")
            .body(details)
    }

    /// Serialize to the wire format, NUL terminator included.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse exactly one frame. Leading EOLs are skipped; trailing EOLs after
    /// the NUL are allowed.
    pub fn parse(input: &str) -> Result<Frame, StompError> {
        let trimmed = trim_eols(input);
        if trimmed.is_empty() {
            return Err(StompError::Empty);
        }
        let (frame, _) = parse_one(trimmed)?;
        Ok(frame)
    }
}

/// True when a WebSocket text message carries nothing but heart-beat EOLs.
pub fn is_heartbeat(text: &str) -> bool {
    !text.is_empty() && trim_eols(text).is_empty()
}

/// Parse every frame in a WebSocket message. Heart-beats between frames are
/// skipped, so a pure heart-beat message yields an empty vector.
pub fn parse_frames(text: &str) -> Result<Vec<Frame>, StompError> {
    let mut frames = Vec::new();
    let mut rest = trim_eols(text);

    while !rest.is_empty() {
        let (frame, consumed) = parse_one(rest)?;
        frames.push(frame);
        rest = trim_eols(&rest[consumed..]);
    }

    Ok(frames)
}

fn trim_eols(s: &str) -> &str {
    s.trim_start_matches(|c: char| c == '\n' || c == '\r')
}

/// Parse one frame from the start of `input`; returns the frame and the number
/// of bytes consumed (through the NUL).
fn parse_one(input: &str) -> Result<(Frame, usize), StompError> {
    let mut pos = 0;
    let mut lines: Vec<&str> = Vec::new();

    loop {
        let nl = input[pos..].find('\n').ok_or(StompError::Incomplete)?;
        let mut line = &input[pos..pos + nl];
        if let Some(stripped) = line.strip_suffix('\r') {
            line = stripped;
        }
        pos += nl + 1;
        if line.is_empty() {
            break;
        }
        lines.push(line);
    }

    let (command_line, header_lines) = lines.split_first().ok_or(StompError::Empty)?;
    let command = Command::parse(command_line)
        .ok_or_else(|| StompError::UnknownCommand(command_line.to_string()))?;

    let mut headers = Vec::with_capacity(header_lines.len());
    for line in header_lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| StompError::BadContentLength(v.clone()))
        })
        .transpose()?;

    let (body, consumed) = match content_length {
        Some(len) => {
            let end = pos
                .checked_add(len)
                .filter(|end| input.get(pos..*end).is_some())
                .ok_or_else(|| StompError::BadContentLength(len.to_string()))?;
            if !input[end..].starts_with('\0') {
                return Err(StompError::MissingNull);
            }
            (&input[pos..end], end + 1)
        }
        None => {
            let nul = input[pos..].find('\0').ok_or(StompError::MissingNull)?;
            (&input[pos..pos + nul], pos + nul + 1)
        }
    };

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        consumed,
    ))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
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
            _ => return Err(StompError::BadEscape(s.to_string())),
        }
    }
    Ok(out)
}
