//! Output sink for the print builtins.
//!
//! Diagnostics go through the `log` facade; program output from `print` goes
//! through an explicit sink object configured once at VM startup. Tests swap
//! in a capturing sink to assert on program output.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

/// Cloneable handle to the program-output sink.
#[derive(Clone)]
pub struct Console {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Default for Console {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Console {
    /// A console writing to the host process's stdout.
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    /// A console writing to an arbitrary sink.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// A console that records everything written, paired with a reader
    /// handle. Used by tests.
    pub fn capture() -> (Self, CapturedOutput) {
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let console = Self::from_writer(SharedBuffer(Arc::clone(&buffer)));
        (console, CapturedOutput { buffer })
    }

    /// Writes one line of program output. Write failures are reported through
    /// the log facade rather than aborting the program.
    pub fn print_line(&self, text: &str) {
        let mut sink = self.sink.lock();
        if writeln!(sink, "{text}").and_then(|_| sink.flush()).is_err() {
            log::error!("vm> failed to write program output");
        }
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader half of a capturing console.
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    /// Everything printed so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// The printed output split into lines.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_records_lines() {
        let (console, output) = Console::capture();
        console.print_line("one");
        console.print_line("two");
        assert_eq!(output.lines(), vec!["one".to_string(), "two".to_string()]);
    }
}
