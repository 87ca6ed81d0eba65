//! Generates a test suite for a C program, maximizing its `gcov` coverage.
//!
//! ```sh
//! cargo run --release -- -p programs/test.c -s programs/__VERIFIER.c -o out
//! ```

use std::{env, process::ExitCode};

use cmafuzz::{cli::parse_args, Error, Fuzzer};

fn fuzz() -> Result<(), Error> {
    let options = parse_args();

    // Let's set the default logging level to `info`
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", if options.verbose { "debug" } else { "info" });
    }
    env_logger::init();

    let harness = options.harness_builder().build()?;
    log::info!(
        "Fuzzing {} ({:?} coverage, dimension {})",
        harness.name(),
        harness.coverage_kind(),
        options.dimension()
    );

    let mut fuzzer = Fuzzer::new(harness, options.cmaes_config(), options.fuzzer_config())?;
    let report = fuzzer.generate_testsuite()?;

    log::info!(
        "{:?} after {} runs, best coverage {:.2}%",
        report.stop_reason,
        report.runs,
        report.best_coverage
    );
    log::info!("{}", report.perf);
    println!("{}", serde_json::to_string_pretty(&report.test_suite)?);
    Ok(())
}

pub fn main() -> ExitCode {
    match fuzz() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
