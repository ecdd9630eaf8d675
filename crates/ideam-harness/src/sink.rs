use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ideam::entity::EntityId;

use ideam_client::client::Operation;
use ideam_client::error::{Error, ErrorKind, Result};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use tracing::debug;

/// Default name of the file storing registration timings.
pub const REGISTER_TIMES: &str = "register_times.csv";

/// Default name of the file storing deregistration timings.
pub const DEREGISTER_TIMES: &str = "deregister_times.csv";

/// The time taken by a single operation on a device.
///
/// A record is written as one `deviceId,operation,durationSeconds,success`
/// line, with the duration expressed in seconds with microsecond precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingRecord {
    /// Device identifier.
    pub device: EntityId,
    /// Timed operation.
    pub operation: Operation,
    /// Wall-clock duration of the operation.
    pub duration: Duration,
    /// Whether the operation succeeded.
    pub success: bool,
}

impl TimingRecord {
    /// Creates a [`TimingRecord`].
    #[must_use]
    pub const fn new(
        device: EntityId,
        operation: Operation,
        duration: Duration,
        success: bool,
    ) -> Self {
        Self {
            device,
            operation,
            duration,
            success,
        }
    }
}

impl std::fmt::Display for TimingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{}.{:06},{}",
            self.device,
            self.operation,
            self.duration.as_secs(),
            self.duration.subsec_micros(),
            self.success
        )
    }
}

impl FromStr for TimingRecord {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let malformed = || {
            Error::new(
                ErrorKind::InvalidInput,
                format!("Malformed timing record `{line}`"),
            )
        };

        let mut fields = line.trim_end().split(',');
        let (Some(device), Some(operation), Some(duration), Some(success), None) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(malformed());
        };

        let operation = match operation {
            "register" => Operation::Register,
            "deregister" => Operation::Deregister,
            _ => return Err(malformed()),
        };

        Ok(Self {
            device: EntityId::new(device)?,
            operation,
            duration: parse_seconds(duration).ok_or_else(malformed)?,
            success: success.parse().map_err(|_| malformed())?,
        })
    }
}

// Parses a decimal number of seconds without going through floating point.
fn parse_seconds(value: &str) -> Option<Duration> {
    let (seconds, fraction) = value.split_once('.').unwrap_or((value, ""));
    if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let seconds = seconds.parse::<u64>().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        fraction.parse::<u32>().ok()? * 10u32.pow(9 - fraction.len() as u32)
    };

    Some(Duration::new(seconds, nanos))
}

/// An append-only timing file.
///
/// Each append writes one complete line while holding the file lock, so
/// lines written by concurrent workers never interleave.
#[derive(Debug)]
pub struct TimingFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl TimingFile {
    async fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error("open", &path, &e))?;

        debug!("Timing file `{}` opened", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &TimingRecord) -> Result<()> {
        let line = format!("{record}\n");

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| io_error("write", &self.path, &e))?;
        file.flush()
            .await
            .map_err(|e| io_error("flush", &self.path, &e))
    }
}

/// The destination of the timing records produced by a provisioning run.
///
/// Registration and deregistration timings are stored in two independent
/// files, each one guarded by its own lock.
#[derive(Debug)]
pub struct ResultSink {
    register: TimingFile,
    deregister: TimingFile,
}

impl ResultSink {
    /// Opens the default timing files inside the given directory, creating
    /// the directory when missing.
    ///
    /// # Errors
    ///
    /// The directory or the files cannot be created.
    pub async fn create(directory: impl AsRef<Path>) -> Result<Self> {
        Self::with_names(directory, REGISTER_TIMES, DEREGISTER_TIMES).await
    }

    /// Opens the timing files with the given names inside a directory,
    /// creating the directory when missing.
    ///
    /// Existing files are appended to.
    ///
    /// # Errors
    ///
    /// The directory or the files cannot be created.
    pub async fn with_names(
        directory: impl AsRef<Path>,
        register_name: impl AsRef<Path>,
        deregister_name: impl AsRef<Path>,
    ) -> Result<Self> {
        let directory = directory.as_ref();
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| io_error("create", directory, &e))?;

        let register = TimingFile::open(directory.join(register_name)).await?;
        let deregister = TimingFile::open(directory.join(deregister_name)).await?;

        Ok(Self {
            register,
            deregister,
        })
    }

    /// Appends a [`TimingRecord`] to the file of its operation.
    ///
    /// # Errors
    ///
    /// - The record refers to an operation which is not timed.
    /// - The record cannot be written.
    pub async fn append(&self, record: &TimingRecord) -> Result<()> {
        match record.operation {
            Operation::Register => self.register.append(record).await,
            Operation::Deregister => self.deregister.append(record).await,
            operation => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("No timing file for the {operation} operation"),
            )),
        }
    }

    /// Returns the registration timing file path.
    #[must_use]
    pub fn register_path(&self) -> &Path {
        self.register.path()
    }

    /// Returns the deregistration timing file path.
    #[must_use]
    pub fn deregister_path(&self) -> &Path {
        self.deregister.path()
    }
}

fn io_error(action: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::new(
        ErrorKind::Io,
        format!("Impossible to {action} `{}`: {e}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ideam_client::client::Operation;
    use ideam_client::error::ErrorKind;

    use crate::devices::Devices;
    use crate::tests::{device, read_records};

    use super::{DEREGISTER_TIMES, REGISTER_TIMES, ResultSink, TimingRecord, parse_seconds};

    #[test]
    fn record_line() {
        let record = TimingRecord::new(
            device("device0"),
            Operation::Register,
            Duration::from_micros(1_234_567),
            true,
        );
        assert_eq!(record.to_string(), "device0,register,1.234567,true");
        assert_eq!(record.to_string().parse::<TimingRecord>().unwrap(), record);

        let record = TimingRecord::new(
            device("device1"),
            Operation::Deregister,
            Duration::from_micros(42),
            false,
        );
        assert_eq!(record.to_string(), "device1,deregister,0.000042,false");
        assert_eq!(record.to_string().parse::<TimingRecord>().unwrap(), record);
    }

    #[test]
    fn every_device_record_parses_back() {
        let devices = Devices::from_names(["device0", "sensor-12", "app_1", "x:y"]).unwrap();
        for (i, id) in devices.into_iter().enumerate() {
            let record = TimingRecord::new(
                id,
                Operation::Deregister,
                Duration::from_micros(5_000 + i as u64),
                i % 2 == 0,
            );
            let line = record.to_string();
            assert_eq!(line.split(',').count(), 4);
            assert_eq!(line.parse::<TimingRecord>().unwrap(), record);
        }
    }

    #[test]
    fn malformed_lines() {
        for line in [
            "",
            "device0,register,1.0",
            "device0,register,1.0,true,extra",
            "device0,publish,1.0,true",
            "device0,register,one,true",
            "device0,register,1.0,yes",
            "device 0,register,1.0,true",
            "a,b0,register,0.005000,true",
        ] {
            let error = line.parse::<TimingRecord>().unwrap_err();
            assert_eq!(error.kind(), ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn seconds() {
        assert_eq!(parse_seconds("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_seconds("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(parse_seconds("2.000001"), Some(Duration::new(2, 1_000)));
        assert_eq!(parse_seconds("1.-5"), None);
        assert_eq!(parse_seconds("1.0000000001"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn creates_missing_directory() {
        let directory = tempfile::tempdir().unwrap();
        let output = directory.path().join("nested").join("results");

        let sink = ResultSink::create(&output).await.unwrap();
        assert_eq!(sink.register_path(), output.join(REGISTER_TIMES));
        assert_eq!(sink.deregister_path(), output.join(DEREGISTER_TIMES));
        assert!(sink.register_path().exists());
        assert!(sink.deregister_path().exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn records_go_to_their_file() {
        let directory = tempfile::tempdir().unwrap();
        let sink = ResultSink::create(directory.path()).await.unwrap();

        let register = TimingRecord::new(
            device("device0"),
            Operation::Register,
            Duration::from_millis(10),
            true,
        );
        let deregister = TimingRecord::new(
            device("device0"),
            Operation::Deregister,
            Duration::from_millis(20),
            false,
        );
        sink.append(&register).await.unwrap();
        sink.append(&deregister).await.unwrap();

        assert_eq!(read_records(sink.register_path()), [register]);
        assert_eq!(read_records(sink.deregister_path()), [deregister]);

        let error = sink
            .append(&TimingRecord::new(
                device("device0"),
                Operation::Publish,
                Duration::ZERO,
                true,
            ))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reopened_files_are_appended() {
        let directory = tempfile::tempdir().unwrap();
        let record = TimingRecord::new(
            device("device0"),
            Operation::Register,
            Duration::from_millis(1),
            true,
        );

        for _ in 0..2 {
            let sink = ResultSink::create(directory.path()).await.unwrap();
            sink.append(&record).await.unwrap();
        }

        assert_eq!(
            read_records(&directory.path().join(REGISTER_TIMES)).len(),
            2
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_do_not_interleave() {
        const WRITERS: usize = 8;
        const RECORDS: usize = 100;

        let directory = tempfile::tempdir().unwrap();
        let sink = Arc::new(ResultSink::create(directory.path()).await.unwrap());

        let mut handles = Vec::new();
        for writer in 0..WRITERS {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                // Long identifiers make partial writes easy to spot.
                let id = device(&format!("{}{writer}", "device".repeat(64)));
                for i in 0..RECORDS {
                    sink.append(&TimingRecord::new(
                        id.clone(),
                        Operation::Register,
                        Duration::from_micros(i as u64),
                        i % 2 == 0,
                    ))
                    .await
                    .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let records = read_records(sink.register_path());
        assert_eq!(records.len(), WRITERS * RECORDS);
        assert!(read_records(sink.deregister_path()).is_empty());
    }
}
