//! Run scheduling.
//!
//! The time of the last successful run is kept as the modification time of a
//! stamp file. When stamping, a random whole number of days up to the
//! configured delay is added, so machines switched on together do not all
//! hit the update server on the same day. The stamp may therefore lie in the
//! future.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, error};

use osupdate_common::msgid;

pub const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Default directory holding the stamp file.
pub const DEFAULT_STAMP_DIR: &str = "/var/lib/osupdate";

/// Stamp file name inside the stamp directory.
pub const STAMP_FILE_NAME: &str = "osupdate-stamp";

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Failed to create stamp directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read stamp file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write stamp file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScheduleError {
    /// Diagnostic id for this failure.
    pub fn message_id(&self) -> &'static str {
        match self {
            ScheduleError::CreateDir { .. } => msgid::CONFIGURATION_ERROR,
            _ => msgid::STAMP_ERROR,
        }
    }
}

/// Persistence of the scheduling record.
pub trait ScheduleStore {
    /// The recorded time, or `None` if there is no record yet.
    fn read(&self) -> Result<Option<SystemTime>, ScheduleError>;

    /// Create or replace the record.
    fn write(&self, time: SystemTime) -> Result<(), ScheduleError>;

    fn exists(&self) -> bool {
        matches!(self.read(), Ok(Some(_)))
    }
}

/// Scheduling record kept as a stamp file's modification time.
#[derive(Debug, Clone)]
pub struct StampFile {
    dir: PathBuf,
}

impl StampFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STAMP_FILE_NAME)
    }

}

impl ScheduleStore for StampFile {
    fn read(&self) -> Result<Option<SystemTime>, ScheduleError> {
        let path = self.path();
        let read_error = |source| ScheduleError::Read {
            path: path.clone(),
            source,
        };

        match std::fs::metadata(&path) {
            Ok(metadata) => metadata.modified().map(Some).map_err(read_error),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_error(e)),
        }
    }

    fn write(&self, time: SystemTime) -> Result<(), ScheduleError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ScheduleError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path();
        let write_error = |source| ScheduleError::Write {
            path: path.clone(),
            source,
        };

        // Truncates any existing contents; only the mtime matters.
        let file = File::create(&path).map_err(write_error)?;
        file.set_modified(time).map_err(write_error)?;
        Ok(())
    }
}

/// Decide whether a run is due at `now`.
///
/// * no record: not due, and a record is created at `now` plus a random
///   delay so the first run happens after one interval plus jitter;
/// * record present: due once more than `interval_days` have passed since
///   it (an unrepresentable sum means never);
/// * record unreadable: due, so a broken stamp cannot block updates.
pub fn is_due<S, R>(store: &S, now: SystemTime, interval_days: u64, jitter_days: u32, rng: &mut R) -> bool
where
    S: ScheduleStore + ?Sized,
    R: Rng + ?Sized,
{
    match store.read() {
        Err(e) => {
            error!(message_id = e.message_id(), error = %e, "Failed to read updater stamp file");
            debug!("Time to update, stamp file is not queryable");
            true
        }
        Ok(None) => {
            debug!("Not time to update, no stamp file yet");
            if let Err(e) = restamp(store, now, interval_days, jitter_days, rng) {
                error!(message_id = e.message_id(), error = %e, "Failed to create updater stamp file");
            }
            false
        }
        Ok(Some(last)) => {
            let due = match next_due(last, interval_days) {
                Some(next) => now > next,
                None => false,
            };
            debug!(due, last = %iso8601(last), "Checked update interval");
            due
        }
    }
}

/// Record a run at `now` plus a random delay of `0..=jitter_days` whole days.
///
/// Returns the recorded time.
pub fn restamp<S, R>(
    store: &S,
    now: SystemTime,
    interval_days: u64,
    jitter_days: u32,
    rng: &mut R,
) -> Result<SystemTime, ScheduleError>
where
    S: ScheduleStore + ?Sized,
    R: Rng + ?Sized,
{
    let delay_days = if jitter_days > 0 {
        rng.gen_range(0..=jitter_days)
    } else {
        0
    };
    let stamp = now + days(u64::from(delay_days));
    store.write(stamp)?;

    match next_due(stamp, interval_days) {
        Some(next) => debug!(next_update = %iso8601(next), "Wrote stamp file"),
        None => debug!("Wrote stamp file, next update is beyond representable time"),
    }
    Ok(stamp)
}

fn next_due(last: SystemTime, interval_days: u64) -> Option<SystemTime> {
    let interval = interval_days.checked_mul(SECS_PER_DAY)?;
    last.checked_add(Duration::from_secs(interval))
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n * SECS_PER_DAY)
}

fn iso8601(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}
