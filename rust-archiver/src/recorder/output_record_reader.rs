//! Record-oriented reader for child process output.
//!
//! ytarchive redraws its progress line with carriage returns, so a piped
//! stdout is a stream of `\r`-separated updates with an occasional `\n`.
//! `BufReadExt::lines()` would sit on those updates until the next newline;
//! this reader yields a record at every `\r` or `\n`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Records longer than this are cut, the remainder is returned as the next record.
const MAX_RECORD_LEN: usize = 64 * 1024;

pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    /// Next non-empty, trimmed record, or `None` at end of stream.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(record) = self.take_record() {
                if record.is_empty() {
                    continue;
                }
                return Ok(Some(record));
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                let record = decode(&std::mem::take(&mut self.pending));
                return Ok((!record.is_empty()).then_some(record));
            }
            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }

    /// Split one record off `pending`, if a delimiter (or the length cap) is reached.
    fn take_record(&mut self) -> Option<String> {
        let end = match self.pending.iter().position(|&b| is_delimiter(b)) {
            Some(idx) => idx,
            None if self.pending.len() >= MAX_RECORD_LEN => MAX_RECORD_LEN,
            None => return None,
        };

        let record: Vec<u8> = self.pending.drain(..end).collect();
        let delimiters = self.pending.iter().take_while(|&&b| is_delimiter(b)).count();
        self.pending.drain(..delimiters);
        Some(decode(&record))
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'\n' | b'\r')
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
