//! Cut a blocking byte stream of back-to-back JSON values into records.
//!
//! The event engine writes JSON objects with no delimiter between them, so
//! line splitting doesn't work. [`FrameReader`] keeps the unconsumed bytes
//! and a small scanner state (nesting depth, inside-string, escape) across
//! reads, and only calls `read` again once every complete record already
//! buffered has been handed out. A blocking `read` is the only place the
//! reader ever waits; a source that reports `WouldBlock` is retried after a
//! short pause instead of being treated as closed.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::error::FrameError;

/// Bytes requested per `read` call.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;
/// Records larger than this are discarded.
pub const DEFAULT_MAX_RECORD: usize = 1024 * 1024;
/// Pause before retrying a non-blocking source that had nothing to give.
const WOULD_BLOCK_PAUSE: Duration = Duration::from_millis(50);

pub type Record = Vec<u8>;

/// Incremental scanner position. Offsets are relative to the reader's buffer.
#[derive(Debug, Default)]
struct Scanner {
  /// Next byte to look at.
  pos: usize,
  /// Start of the record being scanned, if any.
  start: Option<usize>,
  depth: usize,
  in_string: bool,
  escaped: bool,
  /// Current record blew the size limit; consume it without emitting.
  discarding: bool,
  /// Length of the current run of junk between records.
  junk: usize,
}

pub struct FrameReader<R> {
  source: R,
  block: Vec<u8>,
  buffer: Vec<u8>,
  scanner: Scanner,
  ready: VecDeque<Result<Record, FrameError>>,
  max_record: usize,
  finished: bool,
}

impl<R: Read> FrameReader<R> {
  pub fn new(source: R) -> Self {
    Self::with_capacity(source, DEFAULT_BLOCK_SIZE)
  }

  pub fn with_capacity(source: R, block_size: usize) -> Self {
    Self {
      source,
      block: vec![0; block_size.max(1)],
      buffer: Vec::new(),
      scanner: Scanner::default(),
      ready: VecDeque::new(),
      max_record: DEFAULT_MAX_RECORD,
      finished: false,
    }
  }

  pub fn max_record(mut self, limit: usize) -> Self {
    self.max_record = limit.max(1);
    self
  }

  /// Scan everything buffered, queueing every complete record.
  fn scan(&mut self) {
    let s = &mut self.scanner;
    let mut consumed = 0;

    for i in s.pos..self.buffer.len() {
      let b = self.buffer[i];
      let start = match s.start {
        Some(start) => start,
        None => {
          if b == b'{' || b == b'[' {
            if s.junk > 0 {
              self.ready.push_back(Err(FrameError::Junk { len: s.junk }));
              s.junk = 0;
            }
            s.start = Some(i);
            s.depth = 1;
          } else if !b.is_ascii_whitespace() {
            s.junk += 1;
          }
          if s.start.is_none() {
            consumed = i + 1;
          }
          continue;
        }
      };

      if s.in_string {
        if s.escaped {
          s.escaped = false;
        } else if b == b'\\' {
          s.escaped = true;
        } else if b == b'"' {
          s.in_string = false;
        }
      } else {
        match b {
          b'"' => s.in_string = true,
          b'{' | b'[' => s.depth += 1,
          b'}' | b']' => {
            s.depth -= 1;
            if s.depth == 0 {
              if !s.discarding {
                self.ready.push_back(Ok(self.buffer[start..=i].to_vec()));
              }
              s.start = None;
              s.discarding = false;
              consumed = i + 1;
              continue;
            }
          }
          _ => {}
        }
      }

      if !s.discarding && i + 1 - start > self.max_record {
        self.ready.push_back(Err(FrameError::Oversized {
          limit: self.max_record,
        }));
        s.discarding = true;
      }
      if s.discarding {
        consumed = i + 1;
      }
    }

    self.buffer.drain(..consumed);
    s.pos = self.buffer.len();
    if let Some(start) = s.start.as_mut() {
      *start = start.saturating_sub(consumed);
    }
  }

  /// Input is gone: report whatever is left and stop.
  fn finish(&mut self) {
    let s = &mut self.scanner;
    if s.junk > 0 {
      self.ready.push_back(Err(FrameError::Junk { len: s.junk }));
    }
    if s.start.is_some() && !s.discarding {
      self.ready.push_back(Err(FrameError::Truncated {
        len: self.buffer.len(),
      }));
    }
    self.buffer.clear();
    self.finished = true;
  }
}

impl<R: Read> Iterator for FrameReader<R> {
  type Item = Result<Record, FrameError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if let Some(item) = self.ready.pop_front() {
        return Some(item);
      }
      if self.finished {
        return None;
      }
      match self.source.read(&mut self.block) {
        Ok(0) => self.finish(),
        Ok(n) => {
          trace!(bytes = n, "read block");
          self.buffer.extend_from_slice(&self.block[..n]);
          self.scan();
        }
        Err(e) if e.kind() == ErrorKind::Interrupted => {}
        Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(WOULD_BLOCK_PAUSE),
        Err(e) => {
          self.finished = true;
          return Some(Err(FrameError::Io(e)));
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::{self, Cursor};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::mpsc;
  use std::sync::Arc;

  const STREAM: &str = concat!(
    r#"{"history": 1, "state": "s", "message": "box {down}"}"#,
    "\n\n",
    r#"{"history":2,"nested":{"a":[1,{"b":"]"}]},"q":"say \"}\" \\"}"#,
    r#"  {"history": 3}"#,
    "\t",
    r#"[{"x": 1}, {"y": "[["}]"#,
  );

  /// Hands out at most `chunk` bytes per read.
  struct Chunked {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
  }

  impl Read for Chunked {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
      buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
      self.pos += n;
      Ok(n)
    }
  }

  fn records(reader: impl Iterator<Item = Result<Record, FrameError>>) -> Vec<String> {
    reader
      .map(|r| String::from_utf8(r.unwrap()).unwrap())
      .collect()
  }

  #[test]
  fn splits_concatenated_values() {
    let out = records(FrameReader::new(Cursor::new(STREAM)));
    assert_eq!(out.len(), 4);
    assert_eq!(out[0], r#"{"history": 1, "state": "s", "message": "box {down}"}"#);
    assert!(out[1].ends_with(r#""q":"say \"}\" \\"}"#));
    assert_eq!(out[2], r#"{"history": 3}"#);
    for record in &out {
      serde_json::from_str::<serde_json::Value>(record).unwrap();
    }
  }

  #[test]
  fn chunking_does_not_change_records() {
    let whole = records(FrameReader::new(Cursor::new(STREAM)));
    for chunk in 1..=STREAM.len() {
      let source = Chunked {
        data: STREAM.as_bytes().to_vec(),
        pos: 0,
        chunk,
      };
      assert_eq!(records(FrameReader::with_capacity(source, 7)), whole, "chunk size {}", chunk);
    }
  }

  #[test]
  fn drains_every_record_from_one_full_block() {
    // One read fills the block exactly; all three records must come out
    // before the reader asks for more.
    let input = r#"{"a":1}{"b":2}{"c":3}"#;
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    tx.send(input.as_bytes().to_vec()).unwrap();
    let mut reader = FrameReader::with_capacity(
      Blocking {
        rx,
        calls: calls.clone(),
      },
      input.len(),
    );
    for _ in 0..3 {
      reader.next().unwrap().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn truncated_tail_is_reported_not_fatal() {
    let mut reader = FrameReader::new(Cursor::new(r#"{"a":1} {"b": [1, 2"#));
    assert_eq!(reader.next().unwrap().unwrap(), br#"{"a":1}"#.to_vec());
    assert!(matches!(reader.next(), Some(Err(FrameError::Truncated { .. }))));
    assert!(reader.next().is_none());
  }

  #[test]
  fn junk_between_records_is_skipped() {
    let mut reader = FrameReader::new(Cursor::new(r#"oops {"a":1} 42 {"b":2}"#));
    assert!(matches!(reader.next(), Some(Err(FrameError::Junk { len: 4 }))));
    assert_eq!(reader.next().unwrap().unwrap(), br#"{"a":1}"#.to_vec());
    assert!(matches!(reader.next(), Some(Err(FrameError::Junk { len: 2 }))));
    assert_eq!(reader.next().unwrap().unwrap(), br#"{"b":2}"#.to_vec());
    assert!(reader.next().is_none());
  }

  #[test]
  fn oversized_record_is_discarded_and_scanning_resumes() {
    let input = format!(r#"{{"big":"{}"}}{{"ok":1}}"#, "x".repeat(100));
    let mut reader = FrameReader::with_capacity(Cursor::new(input), 16).max_record(32);
    assert!(matches!(reader.next(), Some(Err(FrameError::Oversized { limit: 32 }))));
    assert_eq!(reader.next().unwrap().unwrap(), br#"{"ok":1}"#.to_vec());
    assert!(reader.next().is_none());
  }

  #[test]
  fn empty_input_ends_cleanly() {
    let mut reader = FrameReader::new(Cursor::new("  \n\n"));
    assert!(reader.next().is_none());
  }

  /// Blocks in `read` until the test feeds it; closed when the sender drops.
  struct Blocking {
    rx: mpsc::Receiver<Vec<u8>>,
    calls: Arc<AtomicUsize>,
  }

  impl Read for Blocking {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      match self.rx.recv() {
        Ok(data) => {
          let n = data.len().min(buf.len());
          buf[..n].copy_from_slice(&data[..n]);
          Ok(n)
        }
        Err(_) => Ok(0),
      }
    }
  }

  #[test]
  fn idle_source_is_not_polled() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let (out_tx, out_rx) = mpsc::channel();
    let source = Blocking {
      rx,
      calls: calls.clone(),
    };
    let handle = thread::spawn(move || {
      for record in FrameReader::new(source) {
        out_tx.send(record.unwrap()).unwrap();
      }
    });

    tx.send(br#"{"history": 7}"#.to_vec()).unwrap();
    out_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    thread::sleep(Duration::from_millis(200));
    // One read that returned data, one currently parked in recv().
    assert!(calls.load(Ordering::SeqCst) <= 2);

    drop(tx);
    handle.join().unwrap();
    assert!(out_rx.recv().is_err());
  }

  /// Reports `WouldBlock` once before every chunk, like stdin in non-blocking mode.
  struct Nonblocking {
    chunks: VecDeque<&'static [u8]>,
    ready: bool,
  }

  impl Read for Nonblocking {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      if !self.ready {
        self.ready = true;
        return Err(io::Error::new(ErrorKind::WouldBlock, "no data yet"));
      }
      self.ready = false;
      match self.chunks.pop_front() {
        Some(chunk) => {
          buf[..chunk.len()].copy_from_slice(chunk);
          Ok(chunk.len())
        }
        None => Ok(0),
      }
    }
  }

  #[test]
  fn would_block_waits_for_data() {
    let source = Nonblocking {
      chunks: VecDeque::from([&br#"{"history""#[..], &br#": 1}"#[..]]),
      ready: false,
    };
    let mut reader = FrameReader::new(source);
    assert_eq!(reader.next().unwrap().unwrap(), br#"{"history": 1}"#.to_vec());
    assert!(reader.next().is_none());
  }

  #[test]
  fn hard_read_error_ends_the_stream() {
    struct Broken;
    impl Read for Broken {
      fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(ErrorKind::BrokenPipe, "gone"))
      }
    }
    let mut reader = FrameReader::new(Broken);
    assert!(matches!(reader.next(), Some(Err(FrameError::Io(_)))));
    assert!(reader.next().is_none());
  }
}
