//! Per-step diagnostic logs and output bookkeeping.
//!
//! Each log file is owned by an explicit writer object created once at
//! setup: the header row goes out on creation, every step appends one
//! tab-separated row, and only the coordinating process ever holds an open
//! handle. Downstream tooling is order-sensitive, so rows are flushed as
//! they are written.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::Error;

/// Tab-separated diagnostic time series.
pub struct DiagnosticLog {
    writer: Option<BufWriter<File>>,
}

impl DiagnosticLog {
    /// Open `dir/name` and write the header row. Non-coordinating processes
    /// get an inert writer.
    pub fn create(
        dir: impl AsRef<Path>,
        name: &str,
        columns: &[&str],
        is_coordinator: bool,
    ) -> Result<Self, Error> {
        if !is_coordinator {
            return Ok(DiagnosticLog { writer: None });
        }
        std::fs::create_dir_all(dir.as_ref())?;
        let file = File::create(dir.as_ref().join(name))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", columns.join("\t"))?;
        writer.flush()?;
        Ok(DiagnosticLog {
            writer: Some(writer),
        })
    }

    /// Append one row, the leading column being the current time.
    pub fn append(&mut self, time: f64, values: &[f64]) -> Result<(), Error> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        write!(writer, "{}", time)?;
        for value in values {
            write!(writer, "\t{}", value)?;
        }
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Time-series record of written output files, replayed on checkpoint load.
pub struct OutputRecord {
    path: PathBuf,
    stem: String,
    entries: Vec<(f64, String)>,
    is_coordinator: bool,
}

impl OutputRecord {
    pub fn new(dir: impl AsRef<Path>, stem: &str, is_coordinator: bool) -> Self {
        OutputRecord {
            path: dir.as_ref().join(format!("{}.pvd", stem.trim_end_matches('_'))),
            stem: stem.to_string(),
            entries: Vec::new(),
            is_coordinator,
        }
    }

    /// Register the output of `output_index` at `time` and rewrite the
    /// record file.
    pub fn write_current_timestep(&mut self, time: f64, output_index: u32) -> Result<(), Error> {
        self.entries
            .push((time, format!("{}{:06}.vtu", self.stem, output_index)));
        if !self.is_coordinator {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&self.path)?);
        writeln!(writer, "time\tfile")?;
        for (time, file) in &self.entries {
            writeln!(writer, "{}\t{}", time, file)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn n_entries(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut log =
            DiagnosticLog::create(dir.path(), "solid_ke.txt", &["Time", "KE Rate", "KE"], true)
                .unwrap();
        log.append(0.0, &[0.5, 1.0]).unwrap();
        log.append(0.1, &[0.25, 1.5]).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("solid_ke.txt")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Time\tKE Rate\tKE");
        assert!(lines[1].starts_with("0\t0.5"));
    }

    #[test]
    fn non_coordinator_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = DiagnosticLog::create(dir.path(), "quiet.txt", &["Time"], false).unwrap();
        log.append(0.0, &[1.0]).unwrap();
        assert!(!dir.path().join("quiet.txt").exists());
    }
}
