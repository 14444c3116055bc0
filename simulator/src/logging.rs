use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::writer::MakeWriter;

type SharedFile = Arc<Mutex<BufWriter<File>>>;

/// Sends every formatted line to stdout and, with `--log`, to a buffered file.
///
/// The subscriber owns one clone for the life of the process, so the file is never
/// dropped; `main` keeps another and calls [`RunLog::sync`] before exiting.
#[derive(Clone, Default)]
pub(crate) struct RunLog {
    file: Option<SharedFile>,
}

impl RunLog {
    pub(crate) fn open(path: Option<&Path>) -> io::Result<Self> {
        let file = path
            .map(File::create)
            .transpose()?
            .map(|file| Arc::new(Mutex::new(BufWriter::new(file))));
        Ok(Self { file })
    }

    pub(crate) fn sync(&self) -> io::Result<()> {
        match &self.file {
            Some(file) => lock(file)?.flush(),
            None => Ok(()),
        }
    }
}

fn lock(file: &SharedFile) -> io::Result<MutexGuard<'_, BufWriter<File>>> {
    file.lock().map_err(|_| io::Error::other("log file lock poisoned"))
}

pub(crate) struct RunLogLine<'a> {
    log: &'a RunLog,
}

impl<'a> MakeWriter<'a> for RunLog {
    type Writer = RunLogLine<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogLine { log: self }
    }
}

impl Write for RunLogLine<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().lock().write_all(buf)?;
        if let Some(file) = &self.log.file {
            lock(file)?.write_all(buf)?;
        }
        Ok(buf.len())
    }

    // Only stdout is flushed per line; the file waits for `sync`.
    fn flush(&mut self) -> io::Result<()> {
        io::stdout().lock().flush()
    }
}

/// Keeps the first steps of a run and a rolling tail so a failure can be replayed
/// from the log without holding every step in memory.
pub(crate) struct EventLog {
    first: Vec<String>,
    tail: VecDeque<String>,
    first_limit: usize,
    tail_limit: usize,
    skipped: u64,
}

impl EventLog {
    pub(crate) fn new(first_limit: usize, tail_limit: usize) -> Self {
        Self {
            first: Vec::with_capacity(first_limit),
            tail: VecDeque::with_capacity(tail_limit),
            first_limit,
            tail_limit,
            skipped: 0,
        }
    }

    pub(crate) fn record(&mut self, message: String) {
        tracing::debug!("{}", message);
        if self.first.len() < self.first_limit {
            self.first.push(message);
            return;
        }
        if self.tail_limit == 0 {
            self.skipped += 1;
            return;
        }
        if self.tail.len() == self.tail_limit {
            self.tail.pop_front();
            self.skipped += 1;
        }
        self.tail.push_back(message);
    }

    pub(crate) fn dump_failure(&self, reason: &str) {
        tracing::error!("invariant violated: {}", reason);
        for line in &self.first {
            tracing::error!("  {}", line);
        }
        if self.skipped > 0 {
            tracing::error!("  ... {} steps elided ...", self.skipped);
        }
        for line in &self.tail {
            tracing::error!("  {}", line);
        }
    }

    #[cfg(test)]
    pub(crate) fn retained(&self) -> usize {
        self.first.len() + self.tail.len()
    }
}
