//! STOMP frame codec
//!
//! A frame is UTF-8 text carried in one WebSocket text message:
//!
//! ```text
//! SEND
//! destination:/chat
//! content-type:text/plain
//!
//! hello^@
//! ```
//!
//! The first line is the command, followed by `key:value` header lines (the
//! first colon splits key from value), a blank line and the body, which ends
//! at a NUL byte, at the end of the message, or after `content-length` bytes
//! when that header is present.
//!
//! Header keys and values escape `\`, `:`, CR and LF as `\\`, `\c`, `\r` and
//! `\n`. `CONNECT` and `CONNECTED` frames are exempt from escaping, and STOMP
//! 1.0 has no escaping at all.
//!
//! Outgoing frames with a body carry `content-length`, so bodies containing
//! NUL survive the trip.

use crate::core::error::GatewayError;
use crate::core::events::HeaderBag;
use std::fmt;

/// STOMP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    /// Every supported version, lowest first
    pub const ALL: [Version; 3] = [Version::V1_0, Version::V1_1, Version::V1_2];

    /// Version number as used in `accept-version` and `version` headers
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Parse a version number
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == value)
    }

    /// Version implied by a `v10.stomp`/`v11.stomp`/`v12.stomp` sub-protocol
    pub fn from_subprotocol(protocol: &str) -> Option<Self> {
        match protocol.to_ascii_lowercase().as_str() {
            "v10.stomp" => Some(Version::V1_0),
            "v11.stomp" => Some(Version::V1_1),
            "v12.stomp" => Some(Version::V1_2),
            _ => None,
        }
    }

    fn escapes_headers(&self) -> bool {
        *self != Version::V1_0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// STOMP command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Begin,
    Commit,
    Abort,
    Ack,
    Nack,
    Disconnect,
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Parse a command line
    pub fn parse(line: &str) -> Option<Self> {
        let command = match line {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(command)
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Whether clients may send this command
    pub fn is_client_command(&self) -> bool {
        !matches!(
            self,
            Command::Connected | Command::Message | Command::Receipt | Command::Error
        )
    }

    /// Headers a client frame must carry in the given version
    ///
    /// Acknowledgements changed shape between versions: 1.0 names the
    /// message, 1.1 adds the subscription and 1.2 uses the `ack` id.
    pub fn required_headers(&self, version: Version) -> &'static [&'static str] {
        match (self, version) {
            (Command::Send, _) => &["destination"],
            (Command::Subscribe, _) => &["destination", "id"],
            (Command::Unsubscribe, _) => &["id"],
            (Command::Begin | Command::Commit | Command::Abort, _) => &["transaction"],
            (Command::Ack | Command::Nack, Version::V1_0) => &["message-id"],
            (Command::Ack | Command::Nack, Version::V1_1) => &["subscription", "message-id"],
            (Command::Ack | Command::Nack, Version::V1_2) => &["id"],
            _ => &[],
        }
    }

    /// `CONNECT` and `CONNECTED` headers are never escaped
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: HeaderBag,
    pub body: String,
}

impl Frame {
    /// Create a frame without headers or body
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: HeaderBag::new(),
            body: String::new(),
        }
    }

    /// Add a header, replacing an existing value
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Look up a header the command requires
    pub fn require(&self, name: &str) -> Result<&str, GatewayError> {
        self.header(name).ok_or_else(|| {
            GatewayError::Header(format!(
                "{} frame requires header '{}'",
                self.command, name
            ))
        })
    }

    /// Check that every header the command requires in `version` is present
    pub fn validate(&self, version: Version) -> Result<(), GatewayError> {
        if self.command == Command::Nack && version == Version::V1_0 {
            return Err(GatewayError::Protocol(
                "NACK is not part of STOMP 1.0".to_string(),
            ));
        }
        for name in self.command.required_headers(version) {
            self.require(name)?;
        }
        Ok(())
    }

    /// Parse one WebSocket text message with STOMP 1.2 rules
    pub fn parse(text: &str) -> Result<Option<Self>, GatewayError> {
        Self::parse_as(text, Version::V1_2)
    }

    /// Parse one WebSocket text message
    ///
    /// Returns `Ok(None)` for heart-beats (messages made of end-of-line
    /// characters only).
    pub fn parse_as(text: &str, version: Version) -> Result<Option<Self>, GatewayError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (command_line, mut rest) = split_line(text);
        let command = Command::parse(command_line).ok_or_else(|| {
            GatewayError::Protocol(format!("Unrecognized command '{}'", command_line))
        })?;

        let mut headers = HeaderBag::new();
        loop {
            if rest.is_empty() {
                break;
            }
            let (line, remaining) = split_line(rest);
            rest = remaining;
            if line.is_empty() {
                break;
            }
            // A NUL right after the headers ends a body-less frame
            if line == "\0" {
                rest = "";
                break;
            }

            let (key, value) = line.split_once(':').ok_or_else(|| {
                GatewayError::Header(format!("Header line '{}' has no ':' separator", line))
            })?;
            if key.is_empty() {
                return Err(GatewayError::Header(format!(
                    "Header line '{}' has an empty name",
                    line
                )));
            }

            let (key, value) = if command.escapes_headers() && version.escapes_headers() {
                (unescape_header(key)?, unescape_header(value)?)
            } else {
                (key.to_string(), value.to_string())
            };
            headers.insert(key, value);
        }

        let body = read_body(rest, headers.get("content-length").map(String::as_str))?;

        Ok(Some(Self {
            command,
            headers,
            body,
        }))
    }

    /// Serialize to wire text with STOMP 1.2 rules, NUL-terminated
    pub fn to_text(&self) -> String {
        self.to_text_as(Version::V1_2)
    }

    /// Serialize to wire text, NUL-terminated
    pub fn to_text_as(&self, version: Version) -> String {
        let mut out = self.head(version, self.body.len());
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Serialize with `body` in place of the text body
    ///
    /// Used for binary payloads, which travel as binary WebSocket messages.
    pub fn to_bytes_as(&self, version: Version, body: &[u8]) -> Vec<u8> {
        let mut out = self.head(version, body.len()).into_bytes();
        out.extend_from_slice(body);
        out.push(0);
        out
    }

    /// Command line, headers and the blank line
    ///
    /// Any `content-length` already present is replaced by the real length.
    fn head(&self, version: Version, body_len: usize) -> String {
        let escape = self.command.escapes_headers() && version.escapes_headers();
        let mut out = String::with_capacity(body_len + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (key, value) in &self.headers {
            if key == "content-length" {
                continue;
            }
            if escape {
                out.push_str(&escape_header(key));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(key);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if body_len > 0 {
            out.push_str(&format!("content-length:{}\n", body_len));
        }
        out.push('\n');
        out
    }
}

fn split_line(text: &str) -> (&str, &str) {
    match text.split_once('\n') {
        Some((line, rest)) => (line.strip_suffix('\r').unwrap_or(line), rest),
        None => (text, ""),
    }
}

fn read_body(rest: &str, content_length: Option<&str>) -> Result<String, GatewayError> {
    let Some(length) = content_length else {
        let body = rest.split_once('\0').map_or(rest, |(body, _)| body);
        return Ok(body.to_string());
    };

    let length: usize = length.trim().parse().map_err(|_| {
        GatewayError::Header(format!("Invalid content-length '{}'", length))
    })?;
    let bytes = rest.as_bytes();
    if length > bytes.len() {
        return Err(GatewayError::Header(format!(
            "content-length {} exceeds the {} bytes available",
            length,
            bytes.len()
        )));
    }
    String::from_utf8(bytes[..length].to_vec()).map_err(|_| {
        GatewayError::Header(format!(
            "content-length {} does not end on a character boundary",
            length
        ))
    })
}

/// Parse a `heart-beat` header value (`cx,cy` in milliseconds)
pub fn parse_heart_beat(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Escape a header key or value
pub fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ':' => out.push_str("\\c"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Undo [`escape_header`]
///
/// Any other backslash sequence is a header error.
pub fn unescape_header(value: &str) -> Result<String, GatewayError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('c') => out.push(':'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                return Err(GatewayError::Header(format!(
                    "Invalid escape sequence '\\{}' in '{}'",
                    other, value
                )));
            }
            None => {
                return Err(GatewayError::Header(format!(
                    "Dangling escape character in '{}'",
                    value
                )));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_frame() {
        let frame = Frame::parse("SEND\ndestination:/chat\ncontent-type:text/plain\n\nhello\0")
            .unwrap()
            .unwrap();
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.header("destination"), Some("/chat"));
        assert_eq!(frame.header("content-type"), Some("text/plain"));
        assert_eq!(frame.body, "hello");
        frame.validate(Version::V1_2).unwrap();
    }

    #[test]
    fn test_parse_crlf_and_missing_nul() {
        let frame = Frame::parse("SUBSCRIBE\r\nid:s1\r\ndestination:/a\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(frame.command, Command::Subscribe);
        assert_eq!(frame.header("id"), Some("s1"));
        assert_eq!(frame.header("destination"), Some("/a"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_parse_without_blank_line() {
        let frame = Frame::parse("DISCONNECT").unwrap().unwrap();
        assert_eq!(frame.command, Command::Disconnect);
        assert!(frame.headers.is_empty());
    }

    #[test]
    fn test_heartbeat_is_ignored() {
        assert!(Frame::parse("\n").unwrap().is_none());
        assert!(Frame::parse("\r\n\r\n").unwrap().is_none());
    }

    #[test]
    fn test_leading_heartbeat_before_frame() {
        let frame = Frame::parse("\nSEND\ndestination:/a\n\nx\0").unwrap().unwrap();
        assert_eq!(frame.command, Command::Send);
    }

    #[test]
    fn test_first_colon_splits_header() {
        let frame = Frame::parse("STOMP\nhost:example.org:8080\n\n\0")
            .unwrap()
            .unwrap();
        assert_eq!(frame.header("host"), Some("example.org:8080"));
    }

    #[test]
    fn test_last_header_wins() {
        let frame = Frame::parse("SEND\ndestination:/a\ndestination:/b\n\n\0")
            .unwrap()
            .unwrap();
        assert_eq!(frame.header("destination"), Some("/b"));
        assert_eq!(frame.headers.len(), 1);
    }

    #[test]
    fn test_malformed_header_line() {
        let err = Frame::parse("SEND\ndestination /a\n\n\0").unwrap_err();
        assert!(matches!(err, GatewayError::Header(_)));

        let err = Frame::parse("SEND\n:value\n\n\0").unwrap_err();
        assert!(matches!(err, GatewayError::Header(_)));
    }

    #[test]
    fn test_invalid_escape_sequence() {
        let err = Frame::parse("SEND\ndestination:/a\\t\n\n\0").unwrap_err();
        assert!(matches!(err, GatewayError::Header(_)));
    }

    #[test]
    fn test_connect_headers_are_not_unescaped() {
        let frame = Frame::parse("CONNECT\nlogin:a\\cb\n\n\0").unwrap().unwrap();
        assert_eq!(frame.header("login"), Some("a\\cb"));
    }

    #[test]
    fn test_unknown_command() {
        let err = Frame::parse("PUBLISH\n\n\0").unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }

    #[test]
    fn test_content_length_body() {
        let frame = Frame::parse("SEND\ndestination:/a\ncontent-length:3\n\na\0b\0")
            .unwrap()
            .unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn test_content_length_out_of_range() {
        let err = Frame::parse("SEND\ndestination:/a\ncontent-length:99\n\nabc\0").unwrap_err();
        assert!(matches!(err, GatewayError::Header(_)));

        let err = Frame::parse("SEND\ndestination:/a\ncontent-length:x\n\nabc\0").unwrap_err();
        assert!(matches!(err, GatewayError::Header(_)));
    }

    #[test]
    fn test_required_headers() {
        let frame = Frame::parse("SUBSCRIBE\nid:1\n\n\0").unwrap().unwrap();
        let err = frame.validate(Version::V1_2).unwrap_err();
        assert!(err.to_string().contains("destination"));

        let frame = Frame::parse("UNSUBSCRIBE\n\n\0").unwrap().unwrap();
        assert!(frame.validate(Version::V1_2).is_err());

        let frame = Frame::parse("BEGIN\ntransaction:tx1\n\n\0").unwrap().unwrap();
        frame.validate(Version::V1_2).unwrap();
    }

    #[test]
    fn test_ack_headers_per_version() {
        let v10 = Frame::parse("ACK\nmessage-id:m1\n\n\0").unwrap().unwrap();
        v10.validate(Version::V1_0).unwrap();
        assert!(v10.validate(Version::V1_1).is_err());
        assert!(v10.validate(Version::V1_2).is_err());

        let v11 = Frame::parse("ACK\nsubscription:s1\nmessage-id:m1\n\n\0")
            .unwrap()
            .unwrap();
        v11.validate(Version::V1_1).unwrap();
        let err = v11.validate(Version::V1_2).unwrap_err();
        assert!(err.to_string().contains("'id'"));

        let v12 = Frame::parse("NACK\nid:a1\n\n\0").unwrap().unwrap();
        v12.validate(Version::V1_2).unwrap();
        assert!(matches!(
            v12.validate(Version::V1_0),
            Err(GatewayError::Protocol(_))
        ));
    }

    #[test]
    fn test_v10_headers_are_taken_literally() {
        let text = "SEND\ndestination:/dir\\files\n\n\0";
        assert!(Frame::parse(text).is_err());

        let frame = Frame::parse_as(text, Version::V1_0).unwrap().unwrap();
        assert_eq!(frame.header("destination"), Some("/dir\\files"));

        let frame = Frame::new(Command::Message).with_header("destination", "/a:b");
        assert_eq!(frame.to_text_as(Version::V1_0), "MESSAGE\ndestination:/a:b\n\n\0");
        assert_eq!(frame.to_text_as(Version::V1_1), "MESSAGE\ndestination:/a\\cb\n\n\0");
    }

    #[test]
    fn test_parse_heart_beat() {
        assert_eq!(parse_heart_beat("0,0"), Some((0, 0)));
        assert_eq!(parse_heart_beat("10000, 5000"), Some((10000, 5000)));
        assert_eq!(parse_heart_beat("10000"), None);
        assert_eq!(parse_heart_beat("-1,0"), None);
        assert_eq!(parse_heart_beat("a,b"), None);
    }

    #[test]
    fn test_versions() {
        assert_eq!(Version::parse("1.1"), Some(Version::V1_1));
        assert_eq!(Version::parse("2.0"), None);
        assert_eq!(Version::from_subprotocol("V10.STOMP"), Some(Version::V1_0));
        assert_eq!(Version::from_subprotocol("graphql-ws"), None);
        assert!(Version::V1_0 < Version::V1_2);
    }

    #[test]
    fn test_body_with_nul_survives_rendering() {
        let frame = Frame::new(Command::Message)
            .with_header("destination", "/a")
            .with_header("content-length", "99")
            .with_body("a\0b");
        let text = frame.to_text();
        assert!(text.contains("content-length:3\n"));
        assert!(!text.contains("content-length:99"));

        let parsed = Frame::parse(&text).unwrap().unwrap();
        assert_eq!(parsed.body, "a\0b");
        assert_eq!(parsed.header("content-length"), Some("3"));
    }

    #[test]
    fn test_binary_body_rendering() {
        let frame = Frame::new(Command::Message).with_header("destination", "/bin");
        let bytes = frame.to_bytes_as(Version::V1_2, &[0xff, 0x00, 0x01]);
        assert!(bytes.starts_with(b"MESSAGE\ndestination:/bin\ncontent-length:3\n\n"));
        assert!(bytes.ends_with(&[0xff, 0x00, 0x01, 0x00]));
    }

    #[test]
    fn test_escape_roundtrip_preserves_header_lines() {
        let values = ["a:b", "back\\slash", "multi\nline", "all:\\\n\r"];
        for value in values {
            let line = format!("key:{}", escape_header(value));
            let text = format!("SEND\n{}\n\n\0", line);
            let frame = Frame::parse(&text).unwrap().unwrap();
            assert_eq!(frame.header("key"), Some(value));

            let serialized = frame.to_text();
            let header_line = serialized.lines().nth(1).unwrap();
            assert_eq!(header_line, line);
        }
    }

    #[test]
    fn test_to_text() {
        let frame = Frame::new(Command::Message)
            .with_header("destination", "/chat")
            .with_header("subscription", "s1")
            .with_body("hi");
        assert_eq!(
            frame.to_text(),
            "MESSAGE\ndestination:/chat\nsubscription:s1\ncontent-length:2\n\nhi\0"
        );
    }

    #[test]
    fn test_client_commands() {
        assert!(Command::Send.is_client_command());
        assert!(Command::Nack.is_client_command());
        assert!(!Command::Message.is_client_command());
        assert!(!Command::Connected.is_client_command());
    }
}
