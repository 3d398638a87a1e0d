//! Incremental progress delivery.
//!
//! Long-running writes (credential creation fans out key-wrap provisioning
//! to every member) may answer with `application/x-ndjson`: zero or more
//! progress frames followed by exactly one terminal frame.
//!
//! ```text
//! {"type":"progress","step":"wrapping keys","completed":1,"total":3}
//! {"type":"progress","step":"wrapping keys","completed":2,"total":3}
//! {"type":"result","body":{...}}
//! ```
//!
//! A terminal `{"type":"error","status":409,"error":{"type":..,"error":[..]}}`
//! frame surfaces as [`RegistryError::Api`].

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, RegistryError, Result};

/// Media type of a progress stream.
pub const NDJSON: &str = "application/x-ndjson";

/// One intermediate progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: String,
    pub completed: u64,
    pub total: u64,
}

/// Caller-supplied progress callback.
pub type ProgressFn<'a> = dyn Fn(&ProgressEvent) + Send + Sync + 'a;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Progress(ProgressEvent),
    Result { body: serde_json::Value },
    Error { status: u16, error: ApiError },
}

/// Splits a byte stream into newline-delimited frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete frame, if one is buffered. Blank lines are skipped.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return decode_frame(&line).map(Some);
        }
        Ok(None)
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Result<Option<Frame>> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            self.buf.clear();
            return Ok(None);
        }
        let rest = self.buf.split();
        decode_frame(&rest).map(Some)
    }
}

fn decode_frame(line: &[u8]) -> Result<Frame> {
    let mut frame: Frame = serde_json::from_slice(line)
        .map_err(|e| RegistryError::MalformedResponse(format!("bad progress frame: {}", e)))?;
    if let Frame::Error { status, error } = &mut frame {
        error.status = *status;
    }
    Ok(frame)
}

/// Feeds frames to the callback and returns the terminal result body.
#[derive(Default)]
pub(crate) struct FrameReader {
    decoder: FrameDecoder,
    result: Option<serde_json::Value>,
}

impl FrameReader {
    pub(crate) fn push(&mut self, chunk: &[u8], progress: Option<&ProgressFn<'_>>) -> Result<()> {
        self.decoder.extend(chunk);
        while let Some(frame) = self.decoder.next_frame()? {
            self.handle(frame, progress)?;
        }
        Ok(())
    }

    pub(crate) fn finish(mut self, progress: Option<&ProgressFn<'_>>) -> Result<serde_json::Value> {
        if let Some(frame) = self.decoder.finish()? {
            self.handle(frame, progress)?;
        }
        self.result.ok_or_else(|| {
            RegistryError::MalformedResponse("progress stream ended without a result".into())
        })
    }

    fn handle(&mut self, frame: Frame, progress: Option<&ProgressFn<'_>>) -> Result<()> {
        if self.result.is_some() {
            return Err(RegistryError::MalformedResponse(
                "frame after terminal result".into(),
            ));
        }
        match frame {
            Frame::Progress(event) => {
                if let Some(progress) = progress {
                    progress(&event);
                }
                Ok(())
            }
            Frame::Result { body } => {
                self.result = Some(body);
                Ok(())
            }
            Frame::Error { error, .. } => Err(RegistryError::Api(error)),
        }
    }
}
