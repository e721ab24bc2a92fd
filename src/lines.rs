use crate::jobs::TaskContext;
use crate::Result;
use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

const CHUNK_SIZE: usize = 64 * 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Pulls lines out of a byte stream in fixed-size chunks, tracking how many
/// input bytes each line accounted for (terminator included). A final line
/// with no terminator is still yielded.
pub struct LineStream<R: Read> {
    reader: R,
    buf: Vec<u8>,
    pending: Vec<u8>,
    eof: bool,
    bytes_consumed: u64,
}

impl<R: Read> LineStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0u8; CHUNK_SIZE],
            pending: Vec::new(),
            eof: false,
            bytes_consumed: 0,
        }
    }

    /// Bytes accounted for by the lines returned so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    pub fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let rest = self.pending.split_off(pos + 1);
                let mut line = std::mem::replace(&mut self.pending, rest);
                self.bytes_consumed += line.len() as u64;
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.eof {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.pending);
                self.bytes_consumed += line.len() as u64;
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            let n = self.reader.read(&mut self.buf)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.pending.extend_from_slice(&self.buf[..n]);
            }
        }
    }
}

/// Drives a line-oriented payload through `on_line` with cooperative
/// cancellation once per line and byte-accurate progress reports throttled to
/// roughly ten per second. `describe` supplies the progress text so callers
/// can fold a running record count into it.
pub fn process_lines<R: Read>(
    reader: R,
    total_bytes: u64,
    ctx: &TaskContext,
    describe: impl Fn() -> String,
    mut on_line: impl FnMut(&str) -> Result<()>,
) -> Result<()> {
    let mut stream = LineStream::new(reader);
    let mut last_report: Option<Instant> = None;

    while let Some(line) = stream.next_line()? {
        ctx.check_cancelled()?;
        on_line(&line)?;

        if last_report.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL) {
            last_report = Some(Instant::now());
            ctx.report_progress(Some(stream.bytes_consumed()), Some(total_bytes), &describe());
            thread::yield_now();
        }
    }

    ctx.check_cancelled()?;
    ctx.report_progress(Some(total_bytes), Some(total_bytes), &describe());
    Ok(())
}
