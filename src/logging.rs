use tracing_subscriber::fmt::MakeWriter;

/// Mirrors every formatted log line onto a broadcast channel so the web API
/// can stream daemon logs over SSE, while still writing to stdout.
#[derive(Clone)]
pub(crate) struct StreamMakeWriter {
    pub sender: tokio::sync::broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for StreamMakeWriter {
    type Writer = StreamWriter;

    fn make_writer(&'a self) -> Self::Writer {
        StreamWriter {
            sender: self.sender.clone(),
        }
    }
}

pub(crate) struct StreamWriter {
    sender: tokio::sync::broadcast::Sender<String>,
}

impl std::io::Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        std::io::stdout().write(buf)?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}
