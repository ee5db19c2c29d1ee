use std::{
    fmt::{self, Display, Formatter},
    path::PathBuf,
};

use anyhow::Result;
use diffy::{DiffOptions, PatchFormatter};

use crate::{
    document::Document,
    indentation::Indentation,
    pruner::{prune, WriteDecision},
};

/// One input file, loaded and ready to be pruned.
#[derive(fieldwork::Fieldwork)]
#[fieldwork(get)]
pub struct Editor {
    file_path: PathBuf,
    source_code: String,
    document: Document,
    indentation: Indentation,
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file_path: PathBuf,
    pub decision: WriteDecision,
    pub written: bool,
    pub diff: Option<String>,
}

impl Editor {
    pub fn open(file_path: impl Into<PathBuf>) -> Result<Self> {
        let file_path = file_path.into();
        let document = Document::load(&file_path)?;
        // an unmodified document serializes to exactly what was decoded
        let source_code = document.to_string();

        Ok(Self {
            file_path,
            source_code,
            document,
            indentation: Indentation::default(),
        })
    }

    /// Prune and re-indent in memory, returning the new file contents if the file should be
    /// rewritten.
    fn edit(&mut self) -> (WriteDecision, Option<String>) {
        let decision = prune(&mut self.document);
        match decision {
            WriteDecision::Skip => (decision, None),
            WriteDecision::Write { .. } => {
                self.indentation.apply(&mut self.document);
                (decision, Some(self.document.to_string()))
            }
        }
    }

    /// Work out the change without touching the file.
    pub fn preview(mut self) -> FileReport {
        let (decision, output) = self.edit();
        let diff = output.as_deref().map(|output| self.diff(output));
        FileReport {
            file_path: self.file_path,
            decision,
            written: false,
            diff,
        }
    }

    /// Apply the change, overwriting the file in place.
    pub fn commit(mut self) -> Result<FileReport> {
        let (decision, output) = self.edit();
        if output.is_some() {
            self.document.save(&self.file_path)?;
            log::info!("rewrote {}", self.file_path.display());
        }

        Ok(FileReport {
            file_path: self.file_path,
            decision,
            written: output.is_some(),
            diff: None,
        })
    }

    fn diff(&self, output: &str) -> String {
        let name = self.file_path.display().to_string();
        let mut options = DiffOptions::new();
        options.set_original_filename(name.clone());
        options.set_modified_filename(name);

        let patch = options.create_patch(&self.source_code, output);
        let formatter = PatchFormatter::new().missing_newline_message(false);
        format!("{}", formatter.fmt_patch(&patch))
    }
}

impl Display for FileReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let WriteDecision::Write { removed } = self.decision else {
            return f.write_str("  no Grid/BoundaryConditions section, file left untouched");
        };

        let verb = if self.written { "removed" } else { "would remove" };
        write!(
            f,
            "  {verb} {removed} zero-valued velocity boundary condition(s)"
        )?;

        if let Some(diff) = self.diff.as_deref().filter(|diff| !diff.is_empty()) {
            write!(f, "\n\n{}", diff.trim_end())?;
        }

        if self.written {
            f.write_str("\n  done!")?;
        }

        Ok(())
    }
}
