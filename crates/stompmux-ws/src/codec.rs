//! STOMP 1.2 text framing.
//!
//! One WebSocket text message carries one frame:
//!
//! ```text
//! COMMAND
//! header:value
//!
//! body^@
//! ```
//!
//! A message made only of line endings is a heartbeat and decodes to `None`.
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) in every frame except
//! `CONNECT` and `CONNECTED`.

use std::time::Duration;

use stompmux_core::{Frame, Heartbeat, OpenOptions, frame::DESTINATION_HEADER};
use thiserror::Error;
use tokio_tungstenite::tungstenite::http::Uri;

/// Client CONNECT.
pub const CONNECT: &str = "CONNECT";
/// Broker CONNECTED.
pub const CONNECTED: &str = "CONNECTED";
/// Client SEND.
pub const SEND: &str = "SEND";
/// Client SUBSCRIBE.
pub const SUBSCRIBE: &str = "SUBSCRIBE";
/// Client UNSUBSCRIBE.
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
/// Client DISCONNECT.
pub const DISCONNECT: &str = "DISCONNECT";
/// Broker MESSAGE.
pub const MESSAGE: &str = "MESSAGE";
/// Broker RECEIPT.
pub const RECEIPT: &str = "RECEIPT";
/// Broker ERROR.
pub const ERROR: &str = "ERROR";

const CONTENT_LENGTH: &str = "content-length";

/// Errors decoding a STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// First line was empty.
    #[error("frame has no command")]
    MissingCommand,

    /// No blank line after the headers.
    #[error("frame headers are not terminated")]
    UnterminatedHeaders,

    /// Header line without a colon.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// Backslash followed by something other than `\ n r c`.
    #[error("invalid escape sequence in {0:?}")]
    InvalidEscape(String),

    /// `content-length` is not a number or exceeds the body.
    #[error("bad content-length: {0}")]
    ContentLength(String),

    /// Body is not followed by NUL.
    #[error("frame body is not NUL-terminated")]
    MissingTerminator,

    /// Binary WebSocket message that is not UTF-8.
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    /// MESSAGE without a destination header.
    #[error("MESSAGE frame has no destination")]
    MissingDestination,
}

/// A STOMP frame as it travels on the wire.
///
/// Headers keep their order; when a header repeats, the first occurrence
/// wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    /// Command line, e.g. `MESSAGE`.
    pub command: String,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Frame body.
    pub body: String,
}

impl StompFrame {
    /// Frame with no headers and an empty body.
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), headers: Vec::new(), body: String::new() }
    }

    /// Builder-style header append.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Builder-style body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// CONNECT for `options`.
    ///
    /// Adds `host` from the URL unless the caller supplied one.
    pub fn connect(options: &OpenOptions) -> Self {
        let mut frame = Self::new(CONNECT)
            .header("accept-version", "1.2")
            .header("heart-beat", options.heartbeat.header_value());
        if !options.headers.contains_key("host")
            && let Some(host) = host_of(&options.url)
        {
            frame = frame.header("host", host);
        }
        for (key, value) in &options.headers {
            frame = frame.header(key, value);
        }
        frame
    }

    /// SEND carrying `frame`'s destination, headers and body.
    pub fn send(frame: &Frame) -> Self {
        let mut out = Self::new(SEND).header(DESTINATION_HEADER, &frame.destination);
        for (key, value) in &frame.headers {
            if key != DESTINATION_HEADER && key != CONTENT_LENGTH {
                out = out.header(key, value);
            }
        }
        out.with_body(&frame.body)
    }

    /// SUBSCRIBE with subscription `id`.
    pub fn subscribe(id: u64, destination: &str) -> Self {
        Self::new(SUBSCRIBE)
            .header("id", id.to_string())
            .header(DESTINATION_HEADER, destination)
            .header("ack", "auto")
    }

    /// UNSUBSCRIBE for subscription `id`.
    pub fn unsubscribe(id: u64) -> Self {
        Self::new(UNSUBSCRIBE).header("id", id.to_string())
    }

    /// Convert a MESSAGE into the frame handed to the router.
    pub fn into_message(self) -> Result<Frame, CodecError> {
        let destination =
            self.get(DESTINATION_HEADER).ok_or(CodecError::MissingDestination)?.to_string();
        let mut frame = Frame::new(destination, self.body);
        for (key, value) in self.headers {
            if !frame.headers.contains_key(&key) {
                frame.headers.insert(key, value);
            }
        }
        Ok(frame)
    }

    /// Diagnostic carried by an ERROR frame: the `message` header, or the
    /// body when the broker left the header out.
    pub fn error_message(&self) -> String {
        self.get("message").map_or_else(|| self.body.trim().to_string(), str::to_string)
    }

    /// Serialize to wire text, NUL included.
    ///
    /// A non-empty body gets a `content-length` header unless one is already
    /// present.
    pub fn encode(&self) -> String {
        let escape = escapes_headers(&self.command);
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (key, value) in &self.headers {
            push_header(&mut out, key, value, escape);
        }
        if !self.body.is_empty() && self.get(CONTENT_LENGTH).is_none() {
            push_header(&mut out, CONTENT_LENGTH, &self.body.len().to_string(), false);
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode one WebSocket message.
///
/// Returns `Ok(None)` for a heartbeat.
pub fn decode(text: &str) -> Result<Option<StompFrame>, CodecError> {
    let text = text.trim_start_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(None);
    }

    let (head, rest) = split_blank_line(text).ok_or(CodecError::UnterminatedHeaders)?;
    let mut lines = head.lines();
    let command = lines.next().map(str::trim_end).unwrap_or_default();
    if command.is_empty() {
        return Err(CodecError::MissingCommand);
    }

    let escape = escapes_headers(command);
    let mut headers = Vec::new();
    for line in lines {
        let (key, value) =
            line.split_once(':').ok_or_else(|| CodecError::MalformedHeader(line.to_string()))?;
        if escape {
            headers.push((unescape(key)?, unescape(value)?));
        } else {
            headers.push((key.to_string(), value.to_string()));
        }
    }

    let mut frame = StompFrame { command: command.to_string(), headers, body: String::new() };
    frame.body = match frame.get(CONTENT_LENGTH) {
        Some(raw) => {
            let len: usize =
                raw.trim().parse().map_err(|_| CodecError::ContentLength(raw.to_string()))?;
            let body = rest.get(..len).ok_or_else(|| CodecError::ContentLength(raw.to_string()))?;
            if !rest[len..].starts_with('\0') {
                return Err(CodecError::MissingTerminator);
            }
            body.to_string()
        },
        None => {
            let end = rest.find('\0').ok_or(CodecError::MissingTerminator)?;
            rest[..end].to_string()
        },
    };
    Ok(Some(frame))
}

/// Agree on heartbeat intervals from our offer and the broker's
/// `heart-beat` header (`sx,sy`).
///
/// Each direction is disabled when either side offers zero, otherwise it
/// runs at the slower of the two rates. A missing or unparsable header
/// means the broker does no heartbeating.
pub fn negotiate_heartbeat(ours: Heartbeat, theirs: Option<&str>) -> Heartbeat {
    let (sx, sy) = theirs.and_then(parse_heartbeat).unwrap_or((Duration::ZERO, Duration::ZERO));
    Heartbeat { outgoing: agree(ours.outgoing, sy), incoming: agree(ours.incoming, sx) }
}

fn agree(ours: Duration, theirs: Duration) -> Duration {
    if ours.is_zero() || theirs.is_zero() { Duration::ZERO } else { ours.max(theirs) }
}

fn parse_heartbeat(value: &str) -> Option<(Duration, Duration)> {
    let (x, y) = value.split_once(',')?;
    let x = x.trim().parse().ok()?;
    let y = y.trim().parse().ok()?;
    Some((Duration::from_millis(x), Duration::from_millis(y)))
}

fn host_of(url: &str) -> Option<String> {
    url.parse::<Uri>().ok()?.host().map(str::to_string)
}

fn escapes_headers(command: &str) -> bool {
    command != CONNECT && command != CONNECTED
}

fn push_header(out: &mut String, key: &str, value: &str, escape: bool) {
    if escape {
        push_escaped(out, key);
        out.push(':');
        push_escaped(out, value);
    } else {
        out.push_str(key);
        out.push(':');
        out.push_str(value);
    }
    out.push('\n');
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
}

fn unescape(raw: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            _ => return Err(CodecError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

/// Split at the first empty line, accepting `\n` or `\r\n` endings.
fn split_blank_line(text: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let end = offset + line.len();
        if line == "\n" || line == "\r\n" {
            return Some((&text[..offset], &text[end..]));
        }
        offset = end;
    }
    None
}
