use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

/// Extension of the input files picked up in directory mode.
pub const INPUT_EXTENSION: &str = "ups";

#[derive(Debug, Clone, Default, Eq, PartialEq, clap::Args)]
#[group(required = true, multiple = false)]
pub struct InputSelector {
    /// A single input file to convert in place.
    #[arg(short = 'i', long = "ifile", value_name = "INPUTFILE")]
    pub input_file: Option<String>,

    /// A directory whose `*.ups` files are all converted in place.
    ///
    /// Subdirectories are not searched.
    #[arg(short = 'd', long = "dir", value_name = "DIRECTORY")]
    pub directory: Option<String>,
}

/// Where the files to process come from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum InputSelection {
    File(PathBuf),
    Directory(PathBuf),
}

impl InputSelector {
    /// Exactly one of the input file and the directory must be given. Empty values count as
    /// not given.
    pub fn selection(&self) -> Result<InputSelection, String> {
        let input_file = self.input_file.as_deref().filter(|s| !s.trim().is_empty());
        let directory = self.directory.as_deref().filter(|s| !s.trim().is_empty());

        match (input_file, directory) {
            (Some(input_file), None) => Ok(InputSelection::File(expand(input_file))),
            (None, Some(directory)) => Ok(InputSelection::Directory(expand(directory))),
            (Some(_), Some(_)) => {
                Err("You cannot specify both an input file and an input directory!".into())
            }
            (None, None) => Err("Please specify a valid input file or directory!".into()),
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(&*shellexpand::tilde(path))
}

impl InputSelection {
    /// The files to process, in processing order.
    ///
    /// A directory yields its regular `*.ups` files (symlinks followed, hidden files skipped),
    /// sorted by file name.
    pub fn resolve(&self) -> Result<Vec<PathBuf>> {
        match self {
            InputSelection::File(path) => Ok(vec![path.clone()]),
            InputSelection::Directory(directory) => {
                if !directory.is_dir() {
                    bail!("{} is not a directory", directory.display());
                }

                let mut paths = Vec::new();
                for entry in WalkDir::new(directory)
                    .min_depth(1)
                    .max_depth(1)
                    .sort_by_file_name()
                {
                    let entry = entry
                        .with_context(|| format!("unable to list {}", directory.display()))?;
                    if is_input_file(entry.path()) {
                        paths.push(entry.into_path());
                    }
                }

                if paths.is_empty() {
                    log::warn!(
                        "no *.{INPUT_EXTENSION} files found in {}",
                        directory.display()
                    );
                }

                Ok(paths)
            }
        }
    }
}

fn is_input_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'));

    !hidden
        && path.extension().and_then(|ext| ext.to_str()) == Some(INPUT_EXTENSION)
        && path.is_file()
}
