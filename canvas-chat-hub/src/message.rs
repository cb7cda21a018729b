use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];
const ANNOUNCEMENT_MARKER: &str = "***";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DrawAction {
    Start,
    Move,
    End,
}

/// Structured payload sharing the line channel with chat text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    Draw { action: DrawAction, x: i32, y: i32 },
    Clear,
}

/// One decoded line of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Chat(String),
    Control(ControlEvent),
}

impl Frame {
    /// Classifies a single line with its delimiter already removed.
    ///
    /// Anything that is not a JSON object with a recognized `type` is chat,
    /// including malformed JSON. That fallback is the normal path for plain
    /// text, never an error.
    pub fn classify(line: &str) -> Self {
        match serde_json::from_str::<ControlEvent>(line) {
            Ok(event) => Frame::Control(event),
            Err(_) => Frame::Chat(line.to_string()),
        }
    }

    /// Serializes the frame and appends exactly one `\n`.
    ///
    /// Line breaks inside chat text would split the frame, so they are
    /// flattened to spaces.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Frame::Chat(text) => Ok(encode_chat(text)),
            Frame::Control(event) => {
                let mut encoded = serde_json::to_vec(event)?;
                encoded.push(b'\n');
                Ok(encoded)
            }
        }
    }
}

impl From<ControlEvent> for Frame {
    fn from(event: ControlEvent) -> Self {
        Frame::Control(event)
    }
}

/// Encodes a chat line, which unlike a control event cannot fail.
pub fn encode_chat(text: &str) -> Vec<u8> {
    let mut encoded = text.replace(LINE_ENDINGS, " ").into_bytes();
    encoded.push(b'\n');
    encoded
}

/// Reads the next non-empty frame.
///
/// Returns `Ok(None)` once the stream ends. A trailing fragment that never
/// received its terminator is dropped. Bytes that are not UTF-8 surface as an
/// `InvalidData` error, which callers treat as the stream closing.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 || !line.ends_with('\n') {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        return Ok(Some(Frame::classify(trimmed)));
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = frame.encode().map_err(to_io_error)?;
    write_encoded(writer, &encoded).await
}

/// Writes an already encoded frame and flushes so peers get timely updates.
pub async fn write_encoded<W>(writer: &mut W, encoded: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await
}

/// Wraps system notices (join, leave, shutdown) in the announcement marker.
pub fn announcement(text: &str) -> String {
    format!("{ANNOUNCEMENT_MARKER} {text} {ANNOUNCEMENT_MARKER}")
}

pub fn is_announcement(line: &str) -> bool {
    line.len() > 2 * ANNOUNCEMENT_MARKER.len() + 1
        && line.starts_with(ANNOUNCEMENT_MARKER)
        && line.ends_with(ANNOUNCEMENT_MARKER)
}

/// Renders a chat line the way other participants see it.
pub fn chat_from(name: &str, text: &str) -> String {
    format!("[{name}] {text}")
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
