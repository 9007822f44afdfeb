//! STOMP 1.2 frame codec for the text WebSocket transport

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown STOMP command {0:?}")]
    UnknownCommand(String),
    #[error("malformed header line {0:?}")]
    BadHeader(String),
    #[error("invalid escape sequence in header {0:?}")]
    BadEscape(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn parse(s: &str) -> Result<Self, FrameError> {
        Ok(match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

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

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header; repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, token: &str) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1")
            .header("host", host)
            .header("heart-beat", "0,0")
            .header("Authorization", format!("Bearer {}", token))
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

    pub fn send_json(destination: &str, body: &serde_json::Value) -> Self {
        let body = body.to_string();
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode one text frame. Heart-beats (bare EOLs) yield `None`.
    pub fn decode(text: &str) -> Result<Option<Frame>, FrameError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }
        let text = text.split('\0').next().unwrap_or_default();

        let (head, body) = match text.find("\n\n") {
            Some(pos) => (&text[..pos], &text[pos + 2..]),
            None => match text.find("\r\n\r\n") {
                Some(pos) => (&text[..pos], &text[pos + 4..]),
                None => (text, ""),
            },
        };

        let mut lines = head.lines();
        let command_line = lines.next().ok_or(FrameError::Empty)?.trim_end_matches('\r');
        let command = Command::parse(command_line)?;
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (k, v) = line
                .split_once(':')
                .ok_or_else(|| FrameError::BadHeader(line.to_string()))?;
            if unescape {
                headers.push((unescape_header(k)?, unescape_header(v)?));
            } else {
                headers.push((k.to_string(), v.to_string()));
            }
        }

        Ok(Some(Frame {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

fn unescape_header(s: &str) -> Result<String, FrameError> {
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
            _ => return Err(FrameError::BadEscape(s.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_connect() {
        let frame = Frame::connect("localhost", "abc.def.ghi");
        assert_eq!(
            frame.encode(),
            "CONNECT\naccept-version:1.2,1.1\nhost:localhost\nheart-beat:0,0\n\
             Authorization:Bearer abc.def.ghi\n\n\0"
        );
    }

    #[test]
    fn test_encode_send_json() {
        let body = serde_json::json!({"chatRoomId": "4", "isTyping": true});
        let encoded = Frame::send_json("/app/chat.typing", &body).encode();
        assert!(encoded.starts_with("SEND\ndestination:/app/chat.typing\n"));
        assert!(encoded.contains("content-type:application/json\n"));
        assert!(encoded.ends_with("}\0"));
    }

    #[test]
    fn test_decode_message() {
        let raw = "MESSAGE\ndestination:/topic/chat/4\nsubscription:sub-1\n\
                   message-id:x-1\ncontent-type:application/json\n\n{\"id\":1}\0\n";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-1"));
        assert_eq!(frame.get("destination"), Some("/topic/chat/4"));
        assert_eq!(frame.body, "{\"id\":1}");
    }

    #[test]
    fn test_decode_heartbeat() {
        assert_eq!(Frame::decode("\n").unwrap(), None);
        assert_eq!(Frame::decode("\r\n").unwrap(), None);
    }

    #[test]
    fn test_connected_without_body() {
        let frame = Frame::decode("CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0")
            .unwrap()
            .unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("version"), Some("1.2"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_header_escaping() {
        let frame = Frame::new(Command::Send).header("note", "a:b\nc\\d");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\nc\\\\d\n"));

        let decoded = Frame::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.get("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn test_repeated_header_first_wins() {
        let frame = Frame::decode("MESSAGE\nfoo:1\nfoo:2\n\n\0").unwrap().unwrap();
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Frame::decode("BOGUS\n\n\0"),
            Err(FrameError::UnknownCommand("BOGUS".into()))
        );
        assert!(matches!(
            Frame::decode("MESSAGE\nno-colon\n\n\0"),
            Err(FrameError::BadHeader(_))
        ));
        assert!(matches!(
            Frame::decode("MESSAGE\nbad:\\x\n\n\0"),
            Err(FrameError::BadEscape(_))
        ));
    }
}
