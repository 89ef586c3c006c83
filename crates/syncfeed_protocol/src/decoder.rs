//! Pull-based decoder for a stream of change records.
//!
//! Bytes are pushed in as they arrive from the network; complete records are
//! pulled out one at a time. An object split across chunks stays buffered
//! until the rest of it arrives.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::ChangeRecord;

/// Incremental decoder for concatenated JSON change records.
///
/// # Example
///
/// ```
/// use syncfeed_protocol::RecordDecoder;
///
/// let mut decoder = RecordDecoder::new();
/// decoder.push(br#"{"key":"A","url":"u","seq":1,"etag":"e","del"#);
/// assert!(decoder.next_record().unwrap().is_none());
///
/// decoder.push(b"eted\":true}\n");
/// let record = decoder.next_record().unwrap().unwrap();
/// assert_eq!(record.seq, 1);
/// decoder.finish().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
    /// Start of the undecoded region of `buffer`.
    start: usize,
    /// Bytes consumed since the decoder was created.
    consumed: u64,
}

impl RecordDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.start > 0 && self.start * 2 >= self.buffer.len() {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete record, or `None` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the buffered bytes cannot be a change record no
    /// matter what follows.
    pub fn next_record(&mut self) -> ProtocolResult<Option<ChangeRecord>> {
        let pending = &self.buffer[self.start..];
        let mut stream = serde_json::Deserializer::from_slice(pending).into_iter::<ChangeRecord>();

        match stream.next() {
            None => {
                // Only whitespace left.
                self.consumed += pending.len() as u64;
                self.start = self.buffer.len();
                Ok(None)
            }
            Some(Ok(record)) => {
                let used = stream.byte_offset();
                self.start += used;
                self.consumed += used as u64;
                Ok(Some(record))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(ProtocolError::Malformed {
                offset: self.consumed,
                message: e.to_string(),
            }),
        }
    }

    /// Returns the number of buffered bytes not yet decoded.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len() - self.start
    }

    /// Returns the number of bytes decoded so far.
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed
    }

    /// Checks that the stream ended on a record boundary.
    ///
    /// Call after the transport reports end of stream and `next_record` has
    /// returned `None`.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if a partial object is still buffered.
    pub fn finish(&self) -> ProtocolResult<()> {
        let rest = &self.buffer[self.start..];
        if rest.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(ProtocolError::Truncated {
                pending: rest.len(),
            })
        }
    }

    /// Decodes a complete in-memory stream.
    pub fn decode_all(bytes: &[u8]) -> ProtocolResult<Vec<ChangeRecord>> {
        let mut decoder = Self::new();
        decoder.push(bytes);
        let mut records = Vec::new();
        while let Some(record) = decoder.next_record()? {
            records.push(record);
        }
        decoder.finish()?;
        Ok(records)
    }
}
