//! The [`OnDiskSuite`] writes a finished test suite to a directory.
//!
//! Layout:
//!
//! ```text
//! <dir>/testsuite.json     key -> coverage, in acceptance order
//! <dir>/samples.json       every accepted holder with its optimizer state
//! <dir>/inputs/<n>_<key>   the raw bytes of the n-th accepted input
//! <dir>/report.json        whatever report the caller stores
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    corpus::{SampleCollector, TestSuite},
    Error,
};

/// File name of the suite
pub const SUITE_FILE: &str = "testsuite.json";
/// File name of the accepted holders
pub const SAMPLES_FILE: &str = "samples.json";
/// Directory of the raw inputs
pub const INPUTS_DIR: &str = "inputs";
/// File name of the report
pub const REPORT_FILE: &str = "report.json";

/// Longest key used in an input file name
const MAX_KEY_IN_NAME: usize = 64;

/// Stores test suites, and the raw inputs behind them, to disk.
#[derive(Debug, Clone)]
pub struct OnDiskSuite {
    /// The root directory
    dir_path: PathBuf,
}

impl OnDiskSuite {
    /// Creates the directory if it does not exist yet
    pub fn new<P>(dir_path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let dir_path = dir_path.as_ref().to_path_buf();
        fs::create_dir_all(dir_path.join(INPUTS_DIR))?;
        Ok(Self { dir_path })
    }

    /// The root directory
    #[must_use]
    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    /// Writes the suite, the holders, and one file per accepted input.
    ///
    /// Inputs of an earlier store are removed first, so the directory
    /// always mirrors the last stored collector.
    pub fn store(&self, collector: &SampleCollector) -> Result<(), Error> {
        collector.test_suite().to_file(self.dir_path.join(SUITE_FILE))?;
        self.store_json(SAMPLES_FILE, collector.holders())?;

        let inputs_dir = self.dir_path.join(INPUTS_DIR);
        if inputs_dir.exists() {
            fs::remove_dir_all(&inputs_dir)?;
        }
        fs::create_dir_all(&inputs_dir)?;

        for (idx, input) in collector.optimized_inputs().iter().enumerate() {
            let key = input.key();
            let name = format!("{idx:04}_{}", &key[..key.len().min(MAX_KEY_IN_NAME)]);
            input.to_file(inputs_dir.join(name))?;
        }

        log::info!(
            "Stored {} inputs to {}",
            collector.len(),
            self.dir_path.display()
        );
        Ok(())
    }

    /// Writes a report next to the suite
    pub fn store_report<T: Serialize>(&self, report: &T) -> Result<(), Error> {
        self.store_json(REPORT_FILE, report)
    }

    /// Reads the suite back
    pub fn load_suite(&self) -> Result<TestSuite, Error> {
        TestSuite::from_file(self.dir_path.join(SUITE_FILE))
    }

    fn store_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), Error> {
        fs::write(
            self.dir_path.join(name),
            serde_json::to_string_pretty(value)?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        corpus::{
            ondisk::{INPUTS_DIR, REPORT_FILE, SAMPLES_FILE},
            OnDiskSuite, SampleCollector, SampleHolder,
        },
        inputs::encode,
    };

    #[test]
    fn test_store() {
        let dir = tempfile::tempdir().unwrap();
        let on_disk = OnDiskSuite::new(dir.path().join("out")).unwrap();

        let mut collector = SampleCollector::new(10, 100.0);
        for (i, coverage) in [50.0, 75.0].into_iter().enumerate() {
            let sample = vec![f64::from(i as u8) * 10.0, 255.5];
            assert!(collector.check_interesting(coverage));
            assert!(collector.add_best(SampleHolder::new(
                sample.clone(),
                encode(&sample),
                coverage,
                vec![1.0, 1.0],
                i as u64,
                10,
            )));
        }
        on_disk.store(&collector).unwrap();
        on_disk.store_report(&collector.best_coverage()).unwrap();

        let suite = on_disk.load_suite().unwrap();
        assert_eq!(suite, collector.test_suite());

        let inputs = on_disk.dir_path().join(INPUTS_DIR);
        assert_eq!(fs::read(inputs.join("0000_00ff")).unwrap(), vec![0, 255]);
        assert_eq!(fs::read(inputs.join("0001_0aff")).unwrap(), vec![10, 255]);
        assert!(on_disk.dir_path().join(SAMPLES_FILE).exists());
        assert_eq!(
            fs::read_to_string(on_disk.dir_path().join(REPORT_FILE)).unwrap(),
            "75.0"
        );

        // a second store mirrors the collector again
        collector.reset();
        on_disk.store(&collector).unwrap();
        assert_eq!(fs::read_dir(&inputs).unwrap().count(), 0);
    }
}
