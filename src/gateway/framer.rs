//! Newline framer for the gateway's text protocol.
//!
//! The gateway emits one packet per line, terminated by `\r\n`:
//!
//!   `20;2D;NewKaku;ID=31c42a;SWITCH=1;CMD=ON;\r\n`
//!
//! This module provides a small incremental framer that can be fed arbitrary chunks and
//! yields whole lines when available. Lines longer than the limit are discarded up to
//! the next newline so a noisy serial line cannot grow the buffer without bound.
use bytes::{Buf, BytesMut};

/// Longest line we accept. Real packets stay well under 200 bytes.
pub const MAX_LINE_LEN: usize = 1024;

pub struct LineFramer {
    buf: BytesMut,
    /// Set while skipping the tail of an oversize line.
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(512),
            discarding: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete line without its terminator, or `None` if more bytes are needed.
    /// Empty lines are skipped; invalid UTF-8 is replaced rather than rejected.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            match self.buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let raw = self.buf.split_to(pos + 1);
                    if std::mem::take(&mut self.discarding) {
                        continue;
                    }
                    let line = String::from_utf8_lossy(&raw[..pos]);
                    let line = line.trim_end_matches('\r').trim();
                    if line.is_empty() {
                        continue;
                    }
                    return Some(line.to_string());
                }
                None => {
                    if self.buf.len() > MAX_LINE_LEN {
                        log::warn!(
                            "dropping {} bytes of oversize gateway line",
                            self.buf.len()
                        );
                        self.buf.advance(self.buf.len());
                        self.discarding = true;
                    }
                    return None;
                }
            }
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_chunks_into_lines() {
        let mut f = LineFramer::new();
        f.push(b"20;00;Nodo RadioFrequencyLink;\r\n20;01;Ne");
        assert_eq!(f.next_line().as_deref(), Some("20;00;Nodo RadioFrequencyLink;"));
        assert_eq!(f.next_line(), None);
        f.push(b"wKaku;ID=1;SWITCH=2;CMD=ON;\r\n\r\n");
        assert_eq!(f.next_line().as_deref(), Some("20;01;NewKaku;ID=1;SWITCH=2;CMD=ON;"));
        assert_eq!(f.next_line(), None);
    }

    #[test]
    fn oversize_line_is_dropped_until_newline() {
        let mut f = LineFramer::new();
        f.push(&vec![b'x'; MAX_LINE_LEN + 10]);
        assert_eq!(f.next_line(), None);
        f.push(b"still garbage\n20;02;OK;\n");
        assert_eq!(f.next_line().as_deref(), Some("20;02;OK;"));
    }
}
