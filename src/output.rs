use std::io::{self, Write};
use std::sync::Mutex;

use serde::Serialize;

use crate::app::{DatasetDetails, FetchResult, ListResult};
use crate::progress::{ProgressEvent, ProgressSink, TICK_WIDTH, megabytes, ticks_for};
use crate::store::{CacheState, ClearResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &DatasetDetails) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &CacheState) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Renders notices as lines and transfers as a bar of `>` tick marks.
pub struct ConsoleOutput<W: Write + Send> {
    state: Mutex<ConsoleState<W>>,
}

struct ConsoleState<W> {
    writer: W,
    ticks: usize,
    total: Option<u64>,
}

impl ConsoleOutput<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl ConsoleOutput<io::Stderr> {
    /// Used next to [`JsonOutput`] so stdout carries only the JSON document.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write + Send> ConsoleOutput<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                writer,
                ticks: 0,
                total: None,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        match self.state.into_inner() {
            Ok(state) => state.writer,
            Err(poisoned) => poisoned.into_inner().writer,
        }
    }
}

impl<W: Write + Send> ProgressSink for ConsoleOutput<W> {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        // Rendering errors are ignored.
        let _ = state.render(event);
    }
}

impl<W: Write> ConsoleState<W> {
    fn render(&mut self, event: ProgressEvent) -> io::Result<()> {
        match event {
            ProgressEvent::Notice(line) => writeln!(self.writer, "{line}"),
            ProgressEvent::Started { url, total, .. } => {
                self.ticks = 0;
                self.total = total;
                writeln!(self.writer, "Downloading {url}")?;
                if let Some(total) = total {
                    let header = format!("Downloading {:7.3}MB", megabytes(total));
                    write!(self.writer, "|{header:^width$}|\n|", width = TICK_WIDTH)?;
                }
                self.writer.flush()
            }
            ProgressEvent::Advanced(progress) => {
                match self.total {
                    Some(total) => {
                        let ticks = ticks_for(progress.bytes, total, TICK_WIDTH);
                        if ticks > self.ticks {
                            write!(self.writer, "{}", ">".repeat(ticks - self.ticks))?;
                            self.ticks = ticks;
                        }
                    }
                    None => write!(self.writer, "\r{:7.3}MB", megabytes(progress.bytes))?,
                }
                self.writer.flush()
            }
            ProgressEvent::Finished(progress) => {
                match self.total {
                    Some(total) => {
                        let ticks = ticks_for(progress.bytes, total, TICK_WIDTH);
                        if ticks > self.ticks {
                            write!(self.writer, "{}", ">".repeat(ticks - self.ticks))?;
                        }
                        writeln!(self.writer, "|")?;
                    }
                    None => writeln!(self.writer, "\r{:7.3}MB", megabytes(progress.bytes))?,
                }
                self.ticks = 0;
                self.total = None;
                self.writer.flush()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::progress::DownloadProgress;

    #[test]
    fn tick_bar_never_exceeds_width() {
        let output = ConsoleOutput::new(Vec::new());
        output.event(ProgressEvent::Started {
            url: "http://h/a".to_string(),
            destination: Utf8PathBuf::from("/tmp/a"),
            total: Some(100),
        });
        for bytes in [10, 50, 100, 400] {
            output.event(ProgressEvent::Advanced(DownloadProgress {
                bytes,
                total: Some(100),
            }));
        }
        output.event(ProgressEvent::Finished(DownloadProgress {
            bytes: 400,
            total: Some(100),
        }));

        let text = String::from_utf8(output.into_inner()).unwrap();
        assert_eq!(text.matches('>').count(), TICK_WIDTH);
        assert!(text.ends_with("|\n"));
    }

    #[test]
    fn unknown_length_shows_running_megabytes() {
        let output = ConsoleOutput::new(Vec::new());
        output.event(ProgressEvent::Started {
            url: "http://h/a".to_string(),
            destination: Utf8PathBuf::from("/tmp/a"),
            total: None,
        });
        output.event(ProgressEvent::Advanced(DownloadProgress {
            bytes: 524_288,
            total: None,
        }));
        output.event(ProgressEvent::Finished(DownloadProgress {
            bytes: 1_048_576,
            total: None,
        }));

        let text = String::from_utf8(output.into_inner()).unwrap();
        assert_eq!(text, "Downloading http://h/a\n\r  0.500MB\r  1.000MB\n");
        assert!(!text.contains('>'));
        assert!(!text.contains('|'));
    }

    #[test]
    fn notices_are_written_as_lines() {
        let output = ConsoleOutput::new(Vec::new());
        output.event(ProgressEvent::Notice(
            "You must also agree to the following license:".to_string(),
        ));
        output.event(ProgressEvent::Notice("CC-BY".to_string()));

        let text = String::from_utf8(output.into_inner()).unwrap();
        assert_eq!(text, "You must also agree to the following license:\nCC-BY\n");
    }
}
