//! Defines the console that simulator logs are written to.

use std::io::{self, Write};

use log::{LevelFilter, SetLoggerError};
use spin::{Mutex, Once};

pub struct Console {
    level: LevelFilter,
    writer: Mutex<Box<dyn Write + Send>>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Creates the global console writing to stdout and installs it as the logger.
    pub fn init(level: LevelFilter) -> Result<&'static Self, SetLoggerError> {
        let console = Self::global(level);
        console.install()?;
        Ok(console)
    }

    /// The global console. `level` only applies on the first call.
    pub fn global(level: LevelFilter) -> &'static Self {
        DEFAULT.call_once(|| Console::new(level, Box::new(io::stdout())))
    }

    pub fn new(level: LevelFilter, writer: Box<dyn Write + Send>) -> Self {
        Self {
            level,
            writer: Mutex::new(writer),
        }
    }

    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.level);
        Ok(())
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Redirects output, e.g. to a file.
    pub fn attach(&self, writer: Box<dyn Write + Send>) {
        *self.writer.lock() = writer;
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Write failures are dropped.
        let _ = write_log_entry_to(&mut *self.writer.lock(), record);
    }

    fn flush(&self) {
        let _ = self.writer.lock().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> io::Result<()> {
    #[cfg(feature = "detailed-logging")]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(feature = "detailed-logging"))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, Log, Record};
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<StdMutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[cfg(not(feature = "detailed-logging"))]
    #[test]
    fn plain_entries_pad_the_level() {
        let mut out = Vec::new();
        write_log_entry_to(
            &mut out,
            &Record::builder()
                .args(format_args!("CPU 0 Xlation Hit"))
                .level(Level::Info)
                .build(),
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[INFO ] CPU 0 Xlation Hit\n");
    }

    #[test]
    fn records_above_the_level_are_dropped() {
        let capture = Capture::default();
        let console = Console::new(LevelFilter::Info, Box::new(capture.clone()));
        console.log(
            &Record::builder()
                .args(format_args!("kept"))
                .level(Level::Info)
                .build(),
        );
        console.log(
            &Record::builder()
                .args(format_args!("dropped"))
                .level(Level::Debug)
                .build(),
        );
        let text = capture.text();
        assert!(text.contains("kept"));
        assert!(!text.contains("dropped"));
    }
}
