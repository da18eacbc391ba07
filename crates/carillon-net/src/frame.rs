//! STOMP 1.2 frame codec.
//!
//! The broker speaks STOMP over WebSocket text messages, one frame per
//! message. A frame is a command line, `name:value` header lines, a blank
//! line, an optional body and a NUL terminator. Bare EOLs between frames are
//! heart-beats.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use carillon_shared::constants::{MAX_FRAME_SIZE, STOMP_VERSION};
use carillon_shared::error::FrameError;
use carillon_shared::types::Credentials;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
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
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim, every other frame
    /// escapes `\`, CR, LF and `:`.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Unit written to a link: a frame or a bare EOL heart-beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Frame(Frame),
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Repeated headers are kept; the first occurrence wins on lookup.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn connect(host: &str, credentials: &Credentials, heartbeat: Duration) -> Self {
        let hb = heartbeat.as_millis();
        Frame::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{hb},{hb}"))
            .header("Authorization", credentials.bearer())
            .header("userId", credentials.user_id.to_string())
    }

    pub fn connected(heartbeat: &str) -> Self {
        Frame::new(Command::Connected)
            .header("version", STOMP_VERSION)
            .header("heart-beat", heartbeat)
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, payload: impl Into<Vec<u8>>) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(payload)
    }

    pub fn message(
        subscription: &str,
        destination: &str,
        message_id: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::new(Command::Message)
            .header("subscription", subscription)
            .header("message-id", message_id)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(payload)
    }

    pub fn error(message: &str) -> Self {
        Frame::new(Command::Error).header("message", message)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Serialize to wire bytes. A `content-length` header is added when the
    /// frame has a body and none was set explicitly.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(self.body.len() + 128);

        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        let mut has_length = false;
        for (name, value) in &self.headers {
            has_length |= name == "content-length";
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }

        if !self.body.is_empty() && !has_length {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Parse one frame. Returns `Ok(None)` when `data` only holds heart-beat
    /// EOLs.
    pub fn decode(data: &[u8]) -> Result<Option<Frame>, FrameError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let Some(start) = data.iter().position(|b| *b != b'\n' && *b != b'\r') else {
            return Ok(None);
        };
        let (head, rest) = split_head(&data[start..])?;
        let head = std::str::from_utf8(head).map_err(|_| FrameError::InvalidUtf8)?;

        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command: Command = lines.next().ok_or(FrameError::Empty)?.parse()?;
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if unescape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let declared = headers
            .iter()
            .find(|(key, _)| key == "content-length")
            .map(|(_, value)| value.clone());

        let body = match declared {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| FrameError::InvalidContentLength(raw.clone()))?;
                if rest.len() <= len || rest[len] != 0 {
                    return Err(FrameError::Unterminated);
                }
                rest[..len].to_vec()
            }
            None => {
                let end = rest
                    .iter()
                    .position(|b| *b == 0)
                    .ok_or(FrameError::Unterminated)?;
                rest[..end].to_vec()
            }
        };

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get("destination") {
            Some(destination) => write!(f, "{} {}", self.command, destination),
            None => write!(f, "{}", self.command),
        }
    }
}

/// Outgoing heart-beat interval agreed with the broker, `None` when either
/// side disabled it.
pub fn negotiate_heartbeat(client: Duration, connected: &Frame) -> Option<Duration> {
    let cx = client.as_millis() as u64;
    let (_, sy) = parse_heartbeat(connected.get("heart-beat")?)?;
    if cx == 0 || sy == 0 {
        return None;
    }
    Some(Duration::from_millis(cx.max(sy)))
}

fn parse_heartbeat(value: &str) -> Option<(u64, u64)> {
    let (sx, sy) = value.split_once(',')?;
    Some((sx.trim().parse().ok()?, sy.trim().parse().ok()?))
}

/// Split at the blank line closing the header block.
fn split_head(data: &[u8]) -> Result<(&[u8], &[u8]), FrameError> {
    let mut offset = 0;
    while let Some(pos) = data[offset..].iter().position(|b| *b == b'\n') {
        let eol = offset + pos;
        let next = &data[eol + 1..];
        if next.first() == Some(&b'\n') {
            return Ok((&data[..eol], &next[1..]));
        }
        if next.starts_with(b"\r\n") {
            return Ok((&data[..eol], &next[2..]));
        }
        offset = eol + 1;
    }
    Err(FrameError::Unterminated)
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

fn unescape_header(raw: &str) -> Result<String, FrameError> {
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
            _ => return Err(FrameError::InvalidEscape),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carillon_shared::types::UserId;

    #[test]
    fn test_send_frame_wire_format() {
        let frame = Frame::send("/app/notifications/4", br#"{"id":1}"#.to_vec());
        let wire = String::from_utf8(frame.encode()).unwrap();

        assert_eq!(
            wire,
            "SEND\ndestination:/app/notifications/4\ncontent-type:application/json\n\
             content-length:8\n\n{\"id\":1}\0"
        );

        let decoded = Frame::decode(wire.as_bytes()).unwrap().unwrap();
        assert_eq!(decoded.get("content-length"), Some("8"));
        assert_eq!(decoded.body, frame.body);
    }

    #[test]
    fn test_decode_broker_message() {
        let wire = b"MESSAGE\r\nsubscription:sub-0\r\nmessage-id:m-1\r\n\
                     destination:/topic/notifications/3\r\n\r\n{\"id\":5}\0\n\n";
        let frame = Frame::decode(wire).unwrap().unwrap();

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.get("destination"), Some("/topic/notifications/3"));
        assert_eq!(frame.body_str(), Some("{\"id\":5}"));
    }

    #[test]
    fn test_heartbeat_decodes_to_none() {
        assert_eq!(Frame::decode(b"\n").unwrap(), None);
        assert_eq!(Frame::decode(b"\r\n\n").unwrap(), None);
    }

    #[test]
    fn test_header_escaping() {
        let frame = Frame::new(Command::Send).header("note", "a:b\nc\\d");
        let wire = frame.encode();
        assert!(String::from_utf8_lossy(&wire).contains("note:a\\cb\\nc\\\\d\n"));

        let decoded = Frame::decode(&wire).unwrap().unwrap();
        assert_eq!(decoded.get("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn test_connect_headers_are_not_escaped() {
        let creds = Credentials::new(UserId(9), "tok");
        let frame = Frame::connect("broker.local", &creds, Duration::from_secs(10));
        let decoded = Frame::decode(&frame.encode()).unwrap().unwrap();

        assert_eq!(decoded.get("Authorization"), Some("Bearer tok"));
        assert_eq!(decoded.get("userId"), Some("9"));
        assert_eq!(decoded.get("heart-beat"), Some("10000,10000"));
    }

    #[test]
    fn test_content_length_allows_nul_in_body() {
        let frame = Frame::new(Command::Message).with_body(vec![b'a', 0, b'b']);
        let decoded = Frame::decode(&frame.encode()).unwrap().unwrap();
        assert_eq!(decoded.body, vec![b'a', 0, b'b']);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Frame::decode(b"SEND\ndestination:/a\n\nbody"),
            Err(FrameError::Unterminated)
        );
        assert_eq!(
            Frame::decode(b"PUBLISH\n\n\0"),
            Err(FrameError::UnknownCommand("PUBLISH".into()))
        );
        assert_eq!(
            Frame::decode(b"SEND\nno-colon\n\n\0"),
            Err(FrameError::MalformedHeader("no-colon".into()))
        );
        assert_eq!(
            Frame::decode(b"SEND\nbad:\\x\n\n\0"),
            Err(FrameError::InvalidEscape)
        );
    }

    #[test]
    fn test_heartbeat_negotiation() {
        let client = Duration::from_millis(10_000);

        let both = Frame::connected("0,4000");
        assert_eq!(negotiate_heartbeat(client, &both), Some(Duration::from_millis(10_000)));

        let faster_server = Frame::connected("0,20000");
        assert_eq!(
            negotiate_heartbeat(client, &faster_server),
            Some(Duration::from_millis(20_000))
        );

        let disabled = Frame::connected("0,0");
        assert_eq!(negotiate_heartbeat(client, &disabled), None);
        assert_eq!(negotiate_heartbeat(Duration::ZERO, &both), None);
    }
}
