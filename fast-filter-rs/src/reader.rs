use std::io::BufRead;

use crate::error::{FilterError, Result};

/// Buffered, line-and-length-aware reader over the upstream byte stream.
/// The unit is the byte; no character decoding ever happens here.
pub(crate) struct StreamReader<R> {
  inner: R,
}

impl<R: BufRead> StreamReader<R> {
  pub(crate) fn new(inner: R) -> Self {
    StreamReader { inner }
  }

  /// Next LF-terminated chunk, terminator included. Empty at EOF. A final
  /// line without a terminator is returned as-is.
  pub(crate) fn read_line(&mut self) -> Result<Vec<u8>> {
    let mut line = Vec::with_capacity(128);
    self.inner.read_until(b'\n', &mut line)?;
    Ok(line)
  }

  /// Exactly `n` payload bytes; anything less is a truncated stream.
  pub(crate) fn read_exact_len(&mut self, n: usize) -> Result<Vec<u8>> {
    let mut payload = vec![0u8; n];
    let mut filled = 0usize;
    while filled < n {
      let got = self.inner.read(&mut payload[filled..])?;
      if got == 0 {
        return Err(FilterError::SizeMismatch { expected: n, actual: filled });
      }
      filled += got;
    }
    Ok(payload)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn reads_lines_with_terminators() {
    let mut r = StreamReader::new(Cursor::new(b"one\ntwo\nlast".to_vec()));
    assert_eq!(r.read_line().unwrap(), b"one\n");
    assert_eq!(r.read_line().unwrap(), b"two\n");
    assert_eq!(r.read_line().unwrap(), b"last");
    assert_eq!(r.read_line().unwrap(), b"");
  }

  #[test]
  fn exact_reads_span_newlines_and_nuls() {
    let mut r = StreamReader::new(Cursor::new(b"ab\n\0cd".to_vec()));
    assert_eq!(r.read_exact_len(6).unwrap(), b"ab\n\0cd");
  }

  #[test]
  fn truncated_payload_is_a_size_mismatch() {
    let mut r = StreamReader::new(Cursor::new(b"abc".to_vec()));
    match r.read_exact_len(10) {
      Err(FilterError::SizeMismatch { expected: 10, actual: 3 }) => {}
      other => panic!("expected SizeMismatch, got {other:?}"),
    }
  }
}
