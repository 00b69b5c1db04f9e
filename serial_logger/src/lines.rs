use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Newline-delimited text frames.
///
/// Decoding strips the `\n` (and a `\r` before it) and drops bytes that are not valid UTF-8.
/// Encoding appends a `\n`.
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// How far we have already looked for a newline in the buffer.
    cursor: usize,
    max_length: usize,
    /// Set while dropping the rest of an overlong line.
    is_discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Lines longer than `max_length` bytes are discarded.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            cursor: 0,
            max_length,
            is_discarding: false,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_lossy(bytes: &[u8]) -> String {
    let mut line = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        line.push_str(chunk.valid());
    }
    if line.ends_with('\r') {
        line.pop();
    }
    line
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let look_at = &src[self.cursor..];

            match look_at.iter().position(|&byte| byte == b'\n') {
                Some(position) => {
                    let end = self.cursor + position;
                    self.cursor = 0;

                    let line = src.split_to(end);
                    src.advance(1); // newline

                    if self.is_discarding {
                        // Tail of an overlong line.
                        self.is_discarding = false;
                        continue;
                    }
                    if line.len() > self.max_length {
                        warn!(
                            "Discarding a {} byte line (limit {})",
                            line.len(),
                            self.max_length
                        );
                        continue;
                    }
                    return Ok(Some(decode_lossy(&line)));
                }
                None if self.is_discarding || src.len() > self.max_length => {
                    if !self.is_discarding {
                        warn!(
                            "Discarding {} bytes without a line ending (limit {})",
                            src.len(),
                            self.max_length
                        );
                        self.is_discarding = true;
                    }
                    src.clear();
                    self.cursor = 0;
                    return Ok(None);
                }
                None => {
                    // Don't scan these bytes again when more data arrives.
                    self.cursor = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.cursor = 0;
        self.is_discarding = false;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(decode_lossy(&rest)))
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = vec![];
        while let Some(line) = codec.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn splits_on_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"D;a:1\nD;b:2\r\npartial"[..]);

        assert_eq!(decode_all(&mut codec, &mut buf), ["D;a:1", "D;b:2"]);
        assert_eq!(&buf[..], b"partial");
    }

    #[test]
    fn line_split_across_reads() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"D;te"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"mp:21");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("D;temp:21"));
        assert!(buf.is_empty());
    }

    #[test]
    fn invalid_utf8_is_dropped() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"D;a:\xff1\xc3;b:\xc3\xa92\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), ["D;a:1;b:\u{e9}2"]);
    }

    #[test]
    fn empty_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\n\r\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), ["", ""]);
    }

    #[test]
    fn unterminated_tail_is_flushed_at_eof() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"D;a:1\nD;b:2"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("D;a:1"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("D;b:2"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn overlong_line_is_discarded() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"tail\nD;a:1\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("D;a:1"));
        assert!(buf.is_empty());
    }

    #[test]
    fn tail_of_overlong_line_is_not_a_line() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"D;a:0123456789"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"xx;D;b:2\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"D;c:3\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("D;c:3"));
    }

    #[test]
    fn overlong_line_in_one_chunk_is_discarded() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"D;a:0123456789\nD;b:2\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), ["D;b:2"]);

        let mut buf = BytesMut::from(&b"D;a:0123456789\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn discarded_tail_at_eof_is_dropped() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"D;a:0123456789"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_appends_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("D;a:1".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"D;a:1\n");
    }
}
