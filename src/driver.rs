//! Batch driver: runs every class file listed in an input stream and keeps
//! pass/fail counts.
use std::fmt;
use std::io::{self, BufRead, Write};

use tracing::{debug, error, info};

use crate::error::{Result, RuntimeError};
use crate::runtime::{Runtime, StateChange};

/// Outcome of a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub failed: usize,
}

impl BatchReport {
    /// Share of failed files in percent, zero for an empty batch.
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failed as f64 * 100.0 / self.total as f64
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Finished: {} classes from {} failed to load ({:.2}%)",
            self.failed,
            self.total,
            self.failure_rate()
        )
    }
}

/// Runs one class file. The runtime is left as the run left it so that a
/// failure can still be dumped.
fn run_file(runtime: &mut Runtime, path: &str) -> Result<()> {
    let class_name = runtime.class_path().class_name_for(path).ok_or_else(|| {
        RuntimeError::malformed(format!(
            "{path} is not a .{} file",
            runtime.class_path().extension()
        ))
    })?;
    info!("running {class_name}");
    runtime.run_class(&class_name)
}

/// Reads one path per line from `input` and runs each class in a fresh
/// session. Static writes go to `output` as `field = value`, including those
/// a failing run made before its fault; failures are logged and their state
/// dump goes to `diagnostics`. Only I/O errors on the streams abort the
/// batch.
pub fn run_batch(
    runtime: &mut Runtime,
    input: impl BufRead,
    mut output: impl Write,
    mut diagnostics: impl Write,
) -> io::Result<BatchReport> {
    let mut report = BatchReport::default();
    for line in input.lines() {
        let line = line?;
        let path = line.trim();
        if path.is_empty() {
            continue;
        }
        report.total += 1;

        let result = run_file(runtime, path);
        // Writes made before a fault are still recovered constants.
        for change in runtime.drain_state_changes() {
            match change {
                StateChange::StaticWrite { field, rendered } => {
                    writeln!(output, "{field} = {rendered}")?;
                }
            }
        }
        if let Err(err) = result {
            error!("{path}: {err}");
            report.failed += 1;
            writeln!(diagnostics, "{path}: {err}")?;
            diagnostics.write_all(runtime.dump_state().as_bytes())?;
        }
        let profiler = runtime.profiler();
        debug!("{path}: {} instructions", profiler.steps());
        for (header, entries) in profiler.hot_loops() {
            info!(
                "{path}: hot loop at {}:{} entered {entries} times",
                header.method, header.label
            );
        }
        runtime.reset();
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use std::fs;

    #[test]
    fn failures_are_counted_and_dumped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Good.smali"),
            ".class public LGood;\n\
             .method static constructor <clinit>()V\n\
             \x20   .locals 1\n\
             \x20   const/4 v0, 0x3\n\
             \x20   sput v0, LGood;->count:I\n\
             \x20   return-void\n\
             .end method\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("Bad.smali"),
            ".class public LBad;\n\
             .method static constructor <clinit>()V\n\
             \x20   .locals 0\n\
             \x20   invoke-static {}, LBad;->missing()V\n\
             \x20   return-void\n\
             .end method\n",
        )
        .unwrap();

        let mut runtime = Runtime::new(VmConfig::with_root(dir.path()));
        let input = format!(
            "{}\n\n{}\nnotes.txt\n",
            dir.path().join("Bad.smali").display(),
            dir.path().join("Good.smali").display(),
        );
        let mut output = Vec::new();
        let mut diagnostics = Vec::new();
        let report =
            run_batch(&mut runtime, input.as_bytes(), &mut output, &mut diagnostics).unwrap();

        assert_eq!(report, BatchReport { total: 3, failed: 2 });
        assert!((report.failure_rate() - 66.666).abs() < 0.01);
        assert_eq!(String::from_utf8(output).unwrap(), "LGood;->count:I = 3\n");
        let diagnostics = String::from_utf8(diagnostics).unwrap();
        assert!(diagnostics.contains("method not found: LBad;->missing()V"));
        assert!(diagnostics.contains("invoke-static {}, LBad;->missing()V"));
        assert!(diagnostics.contains("notes.txt"));
        assert_eq!(runtime.depth(), 0);
    }

    #[test]
    fn faulting_run_keeps_earlier_writes_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Partial.smali"),
            ".class public LPartial;\n\
             .method static constructor <clinit>()V\n\
             \x20   .locals 1\n\
             \x20   const/16 v0, 0x2a\n\
             \x20   sput v0, LPartial;->answer:I\n\
             \x20   const p18446744073709551615, 0x1\n\
             \x20   return-void\n\
             .end method\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("After.smali"),
            ".class public LAfter;\n\
             .method static constructor <clinit>()V\n\
             \x20   .locals 1\n\
             \x20   const/4 v0, 0x1\n\
             \x20   sput v0, LAfter;->ran:Z\n\
             \x20   return-void\n\
             .end method\n",
        )
        .unwrap();

        let mut runtime = Runtime::new(VmConfig::with_root(dir.path()));
        let input = format!(
            "{}\n{}\n",
            dir.path().join("Partial.smali").display(),
            dir.path().join("After.smali").display(),
        );
        let mut output = Vec::new();
        let mut diagnostics = Vec::new();
        let report =
            run_batch(&mut runtime, input.as_bytes(), &mut output, &mut diagnostics).unwrap();

        assert_eq!(report, BatchReport { total: 2, failed: 1 });
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "LPartial;->answer:I = 42\nLAfter;->ran:Z = 1\n"
        );
        let diagnostics = String::from_utf8(diagnostics).unwrap();
        assert!(diagnostics.contains("malformed instruction"));
    }

    #[test]
    fn empty_batch_has_no_failures() {
        let mut runtime = Runtime::new(VmConfig::new());
        let report = run_batch(&mut runtime, &b"\n  \n"[..], io::sink(), io::sink()).unwrap();
        assert_eq!(report, BatchReport::default());
        assert_eq!(report.failure_rate(), 0.0);
    }

    #[test]
    fn summary_line() {
        let report = BatchReport { total: 3, failed: 2 };
        assert_eq!(
            report.to_string(),
            "Finished: 2 classes from 3 failed to load (66.67%)"
        );
    }
}
