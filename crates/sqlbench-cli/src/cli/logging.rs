use indicatif::MultiProgress;
use std::io;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
pub enum LogSink {
    Stderr,
    /// Log lines are printed above the live progress bars.
    Progress(MultiProgress),
}

/// Collects one formatted event and writes it in a single piece on drop,
/// with the progress bars suspended.
pub struct SuspendingWriter<W: io::Write> {
    multi: MultiProgress,
    buf: Vec<u8>,
    out: W,
}

impl<W: io::Write> SuspendingWriter<W> {
    pub fn new(multi: MultiProgress, out: W) -> Self {
        Self {
            multi,
            buf: Vec::new(),
            out,
        }
    }
}

impl<W: io::Write> io::Write for SuspendingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.buf);
        let out = &mut self.out;
        self.multi.suspend(|| {
            out.write_all(&pending)?;
            out.flush()
        })
    }
}

impl<W: io::Write> Drop for SuspendingWriter<W> {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}

pub enum SinkWriter {
    Stderr(io::Stderr),
    Progress(SuspendingWriter<io::Stderr>),
}

impl io::Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SinkWriter::Stderr(w) => w.write(buf),
            SinkWriter::Progress(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SinkWriter::Stderr(w) => w.flush(),
            SinkWriter::Progress(w) => w.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            LogSink::Stderr => SinkWriter::Stderr(io::stderr()),
            LogSink::Progress(multi) => {
                SinkWriter::Progress(SuspendingWriter::new(multi.clone(), io::stderr()))
            }
        }
    }
}

pub fn init_logging(log_level: &str, json: bool, sink: LogSink) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_writer(sink);
    let res = if json {
        builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .try_init()
    } else {
        builder.with_ansi(false).try_init()
    };
    if let Err(e) = res {
        eprintln!("warning: logging already initialised: {e}");
    }
}
