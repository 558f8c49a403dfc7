//! Process-wide logger set-up.
//!
//! Records go to stdout. When a log file is named (by `--log-file` or
//! [`LOG_FILE_ENV`]) every line is teed into that file as well. `RUST_LOG` still
//! overrides the default `info` level.
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
};

/// Environment variable naming a log file, used when `--log-file` is absent.
pub const LOG_FILE_ENV: &str = "REFARM_BRIDGE_LOG_FILE";

/// Copies every write to the log file and to stdout.
///
/// The file is written first; a failure there is returned before stdout sees the record.
struct TeeWriter {
    file: File,
    stdout: io::Stdout,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        self.stdout.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.stdout.flush()
    }
}

fn builder() -> Builder {
    let mut builder = Builder::new();
    builder
        .format(|out, record| {
            writeln!(
                out,
                "{} {:<5} {}: {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env();
    builder
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global logger. Falls back to stdout alone when the log file cannot be opened.
pub fn init_logger(log_file: Option<&str>) {
    let path = log_file
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_FILE_ENV).ok());

    let mut builder = builder();
    let Some(path) = path else {
        builder.target(Target::Stdout).init();
        return;
    };

    match open_log_file(Path::new(&path)) {
        Ok(file) => {
            builder
                .target(Target::Pipe(Box::new(TeeWriter {
                    file,
                    stdout: io::stdout(),
                })))
                .init();
            log::info!("Logging to {path} and stdout");
        }
        Err(err) => {
            builder.target(Target::Stdout).init();
            log::warn!("Cannot open log file '{path}' ({err}), logging to stdout only");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_writes_file_copy() {
        let path = std::env::temp_dir().join(format!("refarm-bridge-tee-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut tee = TeeWriter {
            file: open_log_file(&path).unwrap(),
            stdout: io::stdout(),
        };
        tee.write_all(b"first\n").unwrap();
        tee.write_all(b"second\n").unwrap();
        tee.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_log_file_is_appended() {
        let path =
            std::env::temp_dir().join(format!("refarm-bridge-append-{}.log", std::process::id()));
        std::fs::write(&path, "old\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        file.write_all(b"new\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");
        std::fs::remove_file(&path).unwrap();
    }
}
