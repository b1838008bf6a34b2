//! Incremental parser for the emulator's output stream.
//!
//! The socket delivers the `<openmsx-output>` document in chunks of any
//! size. [`OutputParser::feed`] keeps everything it cannot finish yet
//! (partial markup, open elements, collected character data) and resumes on
//! the next call, so the same byte stream yields the same messages however
//! it is split.
//!
//! Bytes are handed to `quick-xml` only up to the end of the last complete
//! markup token. Character data is collected raw and unescaped when its
//! element closes, which keeps entity references that straddle a chunk
//! boundary intact.

use quick_xml::{
    Reader,
    escape::{escape, unescape},
    events::{BytesStart, Event},
};
use tracing::{trace, warn};

use crate::{
    constants::{LOG_ELEMENT, OUTPUT_ELEMENT, REPLY_ELEMENT, UPDATE_ELEMENT},
    error::ProtoError,
    message::{Message, ReplyStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Text,
    Markup { start: usize, quote: Option<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKind {
    Reply,
    Log,
    Update,
}

impl MessageKind {
    fn from_element(name: &str) -> Option<Self> {
        match name {
            REPLY_ELEMENT => Some(Self::Reply),
            LOG_ELEMENT => Some(Self::Log),
            UPDATE_ELEMENT => Some(Self::Update),
            _ => None,
        }
    }

    fn element(self) -> &'static str {
        match self {
            Self::Reply => REPLY_ELEMENT,
            Self::Log => LOG_ELEMENT,
            Self::Update => UPDATE_ELEMENT,
        }
    }
}

/// A message element that has been opened but not yet closed.
#[derive(Debug)]
struct OpenMessage {
    kind: MessageKind,
    /// Element stack depth of the message's own start tag.
    depth: usize,
    attributes: Vec<(String, String)>,
    /// Escaped character data, unescaped on close.
    raw: Vec<u8>,
}

impl OpenMessage {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn attribute_or_empty(&self, key: &str) -> String {
        self.attribute(key).unwrap_or_default().to_string()
    }

    fn finish(self) -> Result<Message, String> {
        let raw = std::str::from_utf8(&self.raw).map_err(|e| e.to_string())?;
        let text = unescape(raw).map_err(|e| e.to_string())?.into_owned();
        Ok(match self.kind {
            MessageKind::Reply => Message::Reply {
                status: ReplyStatus::from_attribute(self.attribute("result")),
                body: text,
            },
            MessageKind::Log => Message::Log {
                level: self.attribute_or_empty("level"),
                text,
            },
            MessageKind::Update => Message::Update {
                kind: self.attribute_or_empty("type"),
                name: self.attribute_or_empty("name"),
                body: text,
            },
        })
    }
}

/// Resumable parser for `<openmsx-output>` streams.
#[derive(Debug)]
pub struct OutputParser {
    /// Bytes received but not yet handed to the XML reader.
    pending: Vec<u8>,
    /// How far `pending` has been scanned for token boundaries.
    scanned: usize,
    scan_state: ScanState,
    /// End of the last complete markup token in `pending`.
    boundary: usize,
    stack: Vec<String>,
    current: Option<OpenMessage>,
    /// Position of `pending[0]` in the stream, 1-based.
    line: usize,
    column: usize,
    failed: Option<ProtoError>,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputParser {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            scan_state: ScanState::Text,
            boundary: 0,
            stack: Vec::new(),
            current: None,
            line: 1,
            column: 1,
            failed: None,
        }
    }

    /// Feed the next chunk of the stream.
    ///
    /// Every message completed by this chunk is appended to `out`, including
    /// the ones that precede a syntax error in the same chunk. Errors are
    /// sticky: once the stream is malformed every later call fails with the
    /// same error.
    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<Message>) -> Result<(), ProtoError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }

        self.pending.extend_from_slice(bytes);
        self.scan();
        if self.boundary == 0 {
            return Ok(());
        }

        let consumed = self.boundary;
        let ready: Vec<u8> = self.pending.drain(..consumed).collect();
        self.scanned -= consumed;
        if let ScanState::Markup { start, quote } = self.scan_state {
            self.scan_state = ScanState::Markup {
                start: start - consumed,
                quote,
            };
        }
        self.boundary = 0;

        trace!(bytes = ready.len(), "parsing complete markup");
        let result = self.process(&ready, out);
        (self.line, self.column) = advance(self.line, self.column, &ready);
        if let Err(err) = &result {
            self.failed = Some(err.clone());
        }
        result
    }

    /// Bytes buffered while waiting for the rest of a token.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Depth of currently open elements, the root included.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Find the end of the last complete markup token in `pending`.
    fn scan(&mut self) {
        let mut state = self.scan_state;
        for i in self.scanned..self.pending.len() {
            let b = self.pending[i];
            state = match state {
                ScanState::Text if b == b'<' => ScanState::Markup {
                    start: i,
                    quote: None,
                },
                ScanState::Text => ScanState::Text,
                ScanState::Markup {
                    start,
                    quote: Some(q),
                } => ScanState::Markup {
                    start,
                    quote: (b != q).then_some(q),
                },
                ScanState::Markup { start, quote: None } => {
                    let token = &self.pending[start..=i];
                    if (b == b'"' || b == b'\'') && !is_raw_section(token) {
                        ScanState::Markup {
                            start,
                            quote: Some(b),
                        }
                    } else if b == b'>' && is_complete_markup(token) {
                        self.boundary = i + 1;
                        ScanState::Text
                    } else {
                        ScanState::Markup { start, quote: None }
                    }
                }
            };
        }
        self.scanned = self.pending.len();
        self.scan_state = state;
    }

    fn process(&mut self, chunk: &[u8], out: &mut Vec<Message>) -> Result<(), ProtoError> {
        let mut reader = Reader::from_reader(chunk);
        reader.config_mut().check_end_names = false;

        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    let offset = reader.error_position() as usize;
                    return Err(self.malformed(chunk, offset, e.to_string()));
                }
            };
            let step = match event {
                Event::Start(e) => self.start_element(&e),
                Event::Empty(e) => self
                    .start_element(&e)
                    .and_then(|()| self.end_element(&element_name(&e), out)),
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    self.end_element(&name, out)
                }
                Event::Text(t) => {
                    self.characters(&t);
                    Ok(())
                }
                Event::GeneralRef(r) => {
                    if let Some(current) = self.current.as_mut() {
                        current.raw.push(b'&');
                        current.raw.extend_from_slice(&r);
                        current.raw.push(b';');
                    }
                    Ok(())
                }
                Event::CData(c) => {
                    let text = String::from_utf8_lossy(&c).into_owned();
                    self.characters(escape(text.as_str()).as_bytes());
                    Ok(())
                }
                Event::Eof => return Ok(()),
                _ => Ok(()),
            };
            if let Err(reason) = step {
                let offset = reader.buffer_position() as usize;
                return Err(self.malformed(chunk, offset, reason));
            }
        }
    }

    fn start_element(&mut self, e: &BytesStart<'_>) -> Result<(), String> {
        let name = element_name(e);
        if let Some(current) = &self.current {
            return Err(format!(
                "unexpected <{name}> inside <{}>",
                current.kind.element()
            ));
        }
        match MessageKind::from_element(&name) {
            Some(kind) => {
                self.current = Some(OpenMessage {
                    kind,
                    depth: self.stack.len(),
                    attributes: attributes(e)?,
                    raw: Vec::new(),
                });
            }
            None if name == OUTPUT_ELEMENT => {}
            None => warn!("Unknown XML tag: {name}"),
        }
        self.stack.push(name);
        Ok(())
    }

    fn end_element(&mut self, name: &str, out: &mut Vec<Message>) -> Result<(), String> {
        match self.stack.pop() {
            Some(open) if open == name => {}
            Some(open) => return Err(format!("expected </{open}>, found </{name}>")),
            None => return Err(format!("unexpected </{name}>")),
        }
        let closes_current = self
            .current
            .as_ref()
            .is_some_and(|current| current.depth == self.stack.len());
        if closes_current {
            if let Some(current) = self.current.take() {
                out.push(current.finish()?);
            }
        }
        Ok(())
    }

    fn characters(&mut self, raw: &[u8]) {
        if let Some(current) = self.current.as_mut() {
            current.raw.extend_from_slice(raw);
        }
    }

    fn malformed(&self, chunk: &[u8], offset: usize, reason: String) -> ProtoError {
        let (line, column) = advance(self.line, self.column, &chunk[..offset.min(chunk.len())]);
        ProtoError::Malformed {
            line,
            column,
            reason,
        }
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let raw = std::str::from_utf8(&attr.value).map_err(|err| err.to_string())?;
        let value = unescape(raw).map_err(|err| err.to_string())?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

/// Comments and CDATA sections may contain quotes and `>`.
fn is_raw_section(token: &[u8]) -> bool {
    token.starts_with(b"<!--") || token.starts_with(b"<![CDATA[")
}

fn is_complete_markup(token: &[u8]) -> bool {
    if token.starts_with(b"<!--") {
        token.len() >= 7 && token.ends_with(b"-->")
    } else if token.starts_with(b"<![CDATA[") {
        token.ends_with(b"]]>")
    } else {
        true
    }
}

fn advance(mut line: usize, mut column: usize, bytes: &[u8]) -> (usize, usize) {
    for &b in bytes {
        if b == b'\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}
