use std::{
    fmt::{self, Display, Formatter},
    io::Write,
    path::PathBuf,
};

use anyhow::Result;

use crate::{editor::Editor, pruner::WriteDecision, selector::InputSelection};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RunOptions {
    /// Print diffs instead of writing files.
    pub dry_run: bool,
    /// Abort at the first file that cannot be processed.
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RunSummary {
    pub processed: usize,
    pub rewritten: usize,
    pub skipped: usize,
    pub failed: Vec<PathBuf>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {} file(s): {} rewritten, {} skipped, {} failed",
            self.processed,
            self.rewritten,
            self.skipped,
            self.failed.len()
        )
    }
}

/// Process every selected file in order, reporting progress to `out`.
///
/// A file that cannot be read, parsed or written is reported and the run moves on to the next
/// one, unless `fail_fast` is set. Errors listing the input directory or writing to `out`
/// always end the run.
pub fn run(
    selection: &InputSelection,
    options: &RunOptions,
    out: &mut impl Write,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    for file_path in selection.resolve()? {
        writeln!(out, "Processing file: {}", file_path.display())?;
        summary.processed += 1;

        let report = Editor::open(&file_path).and_then(|editor| {
            if options.dry_run {
                Ok(editor.preview())
            } else {
                editor.commit()
            }
        });

        match report {
            Ok(report) => {
                match report.decision {
                    WriteDecision::Skip => summary.skipped += 1,
                    WriteDecision::Write { .. } => summary.rewritten += 1,
                }
                writeln!(out, "{report}")?;
            }
            Err(error) => {
                log::error!("{error:#}");
                writeln!(out, "  failed: {error:#}")?;
                if options.fail_fast {
                    return Err(error);
                }
                summary.failed.push(file_path);
            }
        }
    }

    writeln!(out, "{summary}")?;
    Ok(summary)
}
