use std::fmt::Display;

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};

use super::{MultipartError, PartHeader};

/// Bytes of preamble tolerated before the first boundary.
const MAX_PREAMBLE_BYTES: usize = 16 * 1024;
/// Spaces and tabs tolerated after a delimiter.
const MAX_TRANSPORT_PADDING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingBoundary,
    Headers,
    Body,
    Done,
}

/// Pull-based multipart reader over a body byte stream.
///
/// Call [`next_part`](Self::next_part) to advance to the next part's headers,
/// then [`next_chunk`](Self::next_chunk) until it returns `None` to read that
/// part's body. Calling `next_part` while a body is unread discards the rest
/// of it.
pub struct MultipartStream<S> {
    stream: S,
    buffer: BytesMut,
    /// `--boundary`
    dash_boundary: Bytes,
    /// `\r\n--boundary`
    delimiter: Bytes,
    state: State,
    eof: bool,
    max_header_bytes: usize,
}

impl<S, E> MultipartStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(stream: S, boundary: &str, max_header_bytes: usize) -> Self {
        let dash_boundary = Bytes::from(format!("--{}", boundary));
        let delimiter = Bytes::from(format!("\r\n--{}", boundary));

        Self {
            stream,
            buffer: BytesMut::new(),
            dash_boundary,
            delimiter,
            state: State::AwaitingBoundary,
            eof: false,
            max_header_bytes,
        }
    }

    /// Advance to the next part. Returns `None` after the closing boundary.
    pub async fn next_part(&mut self) -> Result<Option<PartHeader>, MultipartError> {
        loop {
            match self.state {
                State::AwaitingBoundary => self.skip_preamble().await?,
                State::Body => while self.next_chunk().await?.is_some() {},
                State::Headers => return self.read_headers().await.map(Some),
                State::Done => return Ok(None),
            }
        }
    }

    /// Next chunk of the current part's body, or `None` at its end.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, MultipartError> {
        if self.state != State::Body {
            return Ok(None);
        }

        loop {
            if let Some(pos) = find(&self.buffer, &self.delimiter) {
                if pos > 0 {
                    return Ok(Some(self.buffer.split_to(pos).freeze()));
                }
                self.buffer.advance(self.delimiter.len());
                self.after_delimiter().await?;
                return Ok(None);
            }

            // Anything before the last `delimiter.len() - 1` bytes cannot be
            // the start of a delimiter.
            let keep = self.delimiter.len() - 1;
            if self.buffer.len() > keep {
                let emit = self.buffer.len() - keep;
                return Ok(Some(self.buffer.split_to(emit).freeze()));
            }

            if !self.fill().await? {
                return Err(truncated());
            }
        }
    }

    async fn skip_preamble(&mut self) -> Result<(), MultipartError> {
        loop {
            if self.buffer.starts_with(&self.dash_boundary) {
                self.buffer.advance(self.dash_boundary.len());
                return self.after_delimiter().await;
            }
            if let Some(pos) = find(&self.buffer, &self.delimiter) {
                self.buffer.advance(pos + self.delimiter.len());
                return self.after_delimiter().await;
            }
            if self.buffer.len() > MAX_PREAMBLE_BYTES + self.delimiter.len() {
                return Err(MultipartError::Malformed(
                    "Multipart boundary not found".to_string(),
                ));
            }
            if !self.fill().await? {
                return Err(MultipartError::Malformed(
                    "Multipart boundary not found".to_string(),
                ));
            }
        }
    }

    /// Consume what follows a boundary: `--` for the close delimiter, or
    /// optional padding and CRLF before the next part's headers.
    async fn after_delimiter(&mut self) -> Result<(), MultipartError> {
        self.ensure(2).await?;
        if self.buffer.starts_with(b"--") {
            self.state = State::Done;
            // Epilogue is ignored
            self.buffer.clear();
            return Ok(());
        }

        let mut padding = 0;
        loop {
            self.ensure(1).await?;
            match self.buffer[0] {
                b' ' | b'\t' => {
                    self.buffer.advance(1);
                    padding += 1;
                    if padding > MAX_TRANSPORT_PADDING {
                        return Err(MultipartError::Malformed(
                            "Too much padding after multipart boundary".to_string(),
                        ));
                    }
                }
                _ => break,
            }
        }

        self.ensure(2).await?;
        if !self.buffer.starts_with(b"\r\n") {
            return Err(MultipartError::Malformed(
                "Invalid characters after multipart boundary".to_string(),
            ));
        }
        self.buffer.advance(2);
        self.state = State::Headers;
        Ok(())
    }

    async fn read_headers(&mut self) -> Result<PartHeader, MultipartError> {
        loop {
            // A part without any header lines
            if self.buffer.starts_with(b"\r\n") {
                self.buffer.advance(2);
                self.state = State::Body;
                return PartHeader::parse(&[]);
            }

            if let Some(pos) = find(&self.buffer, b"\r\n\r\n") {
                if pos > self.max_header_bytes {
                    return Err(MultipartError::HeaderTooLarge(self.max_header_bytes));
                }
                let block = self.buffer.split_to(pos);
                self.buffer.advance(4);
                self.state = State::Body;
                return PartHeader::parse(&block);
            }

            if self.buffer.len() > self.max_header_bytes + 3 {
                return Err(MultipartError::HeaderTooLarge(self.max_header_bytes));
            }
            if !self.fill().await? {
                return Err(truncated());
            }
        }
    }

    async fn ensure(&mut self, len: usize) -> Result<(), MultipartError> {
        while self.buffer.len() < len {
            if !self.fill().await? {
                return Err(truncated());
            }
        }
        Ok(())
    }

    /// Pull one more chunk into the buffer. Returns `false` at end of stream.
    async fn fill(&mut self) -> Result<bool, MultipartError> {
        if self.eof {
            return Ok(false);
        }
        loop {
            match self.stream.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                    return Ok(true);
                }
                Some(Err(e)) => return Err(MultipartError::Stream(e.to_string())),
                None => {
                    self.eof = true;
                    return Ok(false);
                }
            }
        }
    }
}

fn truncated() -> MultipartError {
    MultipartError::Malformed("Multipart body ended before the closing boundary".to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
