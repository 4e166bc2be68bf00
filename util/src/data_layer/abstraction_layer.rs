use std::fs::File;
use std::path::{Path, PathBuf};

use errors::*;

/// The filesystem operations the master and the minions need from the
/// storage backing a job: output-existence checks, recursive removal of
/// temporary directories, creation of shuffle stub files, and enough
/// introspection to carve input files into resource items.
pub trait AbstractionLayer: Send + Sync {
    fn open_file(&self, path: &Path) -> Result<File>;

    /// Creates the file, truncating it if it exists. Parent directories
    /// must already exist; call `create_dir_all` first.
    fn create_file(&self, path: &Path) -> Result<File>;

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    fn exists(&self, path: &Path) -> Result<bool>;

    fn is_file(&self, path: &Path) -> Result<bool>;

    fn is_dir(&self, path: &Path) -> Result<bool>;

    fn file_size(&self, path: &Path) -> Result<u64>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Removes a file or a directory tree. Removing a missing path is not
    /// an error.
    fn remove(&self, path: &Path) -> Result<()>;
}
