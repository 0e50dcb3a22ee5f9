//! Record framing for converter output.
//!
//! ffmpeg rewrites its stats line with `\r`. When stderr is piped those updates
//! never end in `\n`, so a plain line reader would only surface them at exit.
//! [`RecordCodec`] yields records delimited by either `\n` or `\r`.

use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::Decoder;

/// Splits a byte stream into trimmed, non-empty text records.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCodec;

fn is_delimiter(b: &u8) -> bool {
    matches!(b, b'\n' | b'\r')
}

fn to_record(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

impl Decoder for RecordCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        while let Some(idx) = src.iter().position(is_delimiter) {
            let record = src.split_to(idx);
            let delimiters = src.iter().take_while(|b| is_delimiter(b)).count();
            src.advance(delimiters);

            if let Some(record) = to_record(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(record) = self.decode(src)? {
            return Ok(Some(record));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(to_record(&rest))
    }
}
