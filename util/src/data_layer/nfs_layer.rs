use std::fs;
use std::fs::{DirEntry, File};
use std::path::{Path, PathBuf};

use errors::*;

use data_layer::abstraction_layer::AbstractionLayer;

/// Data layer for a shared filesystem mounted at a fixed point on every
/// machine of the cluster. Paths handed to the layer are rooted at the
/// mount point.
pub struct NFSAbstractionLayer {
    nfs_path: PathBuf,
}

impl NFSAbstractionLayer {
    pub fn new(nfs_path: &Path) -> Self {
        NFSAbstractionLayer { nfs_path: PathBuf::from(nfs_path) }
    }

    fn absolute_path(&self, path: &Path) -> Result<PathBuf> {
        debug!(
            "Attempting to get absolute path: {:?}, {:?}",
            self.nfs_path,
            path
        );

        if path.is_absolute() {
            let relative_path = path.strip_prefix("/").chain_err(
                || "Error occured stripping prefix",
            )?;
            return Ok(self.nfs_path.join(relative_path));
        }
        Ok(self.nfs_path.join(path))
    }

    fn abstracted_path(&self, path: &Path) -> Result<PathBuf> {
        if path.starts_with(self.nfs_path.clone()) {
            let abstracted_path = path.strip_prefix(self.nfs_path.as_path()).chain_err(
                || "Unable to strip prefix from path",
            )?;
            return Ok(Path::new("/").join(abstracted_path));
        }
        Ok(PathBuf::from(path))
    }
}

impl AbstractionLayer for NFSAbstractionLayer {
    fn open_file(&self, path: &Path) -> Result<File> {
        let file_path = self.absolute_path(path).chain_err(|| "Unable to get path")?;
        debug!("Opening file: {}", file_path.to_string_lossy());
        File::open(file_path.clone()).chain_err(|| format!("unable to open file {:?}", file_path))
    }

    fn create_file(&self, path: &Path) -> Result<File> {
        let file_path = self.absolute_path(path).chain_err(|| "Unable to get path")?;
        debug!("Creating file: {}", file_path.to_string_lossy());
        File::create(file_path.clone()).chain_err(|| {
            format!("unable to create file {:?}", file_path)
        })
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let absolute_path = self.absolute_path(path).chain_err(|| "Unable to get path")?;
        debug!("Reading from {:?}", absolute_path);
        let entries = fs::read_dir(absolute_path.as_path()).chain_err(
            || "Unable to read input directory",
        )?;
        let mut abstracted_entries: Vec<PathBuf> = vec![];
        for entry in entries {
            let entry: DirEntry = entry.chain_err(|| "Error reading input directory")?;
            let abstracted_path = self.abstracted_path(&entry.path()).chain_err(
                || "Unable to get abstracted path",
            )?;
            abstracted_entries.push(abstracted_path)
        }
        Ok(abstracted_entries)
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        let absolute_path = self.absolute_path(path).chain_err(|| "Unable to get path")?;
        Ok(absolute_path.exists())
    }

    fn is_file(&self, path: &Path) -> Result<bool> {
        let absolute_path = self.absolute_path(path).chain_err(|| "Unable to get path")?;
        Ok(absolute_path.is_file())
    }

    fn is_dir(&self, path: &Path) -> Result<bool> {
        let absolute_path = self.absolute_path(path).chain_err(|| "Unable to get path")?;
        Ok(absolute_path.is_dir())
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let absolute_path = self.absolute_path(path).chain_err(|| "Unable to get path")?;
        let metadata = fs::metadata(&absolute_path).chain_err(|| {
            format!("unable to read metadata of {:?}", absolute_path)
        })?;
        Ok(metadata.len())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let absolute_path = self.absolute_path(path).chain_err(
            || "Unable to get absolute_path",
        )?;
        debug!("Creating directory: {:?}", absolute_path);
        fs::create_dir_all(absolute_path.as_path()).chain_err(|| "Unable to create directories")
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let absolute_path = self.absolute_path(path).chain_err(
            || "Unable to get absolute_path",
        )?;
        if !absolute_path.exists() {
            return Ok(());
        }
        if absolute_path.is_dir() {
            fs::remove_dir_all(&absolute_path).chain_err(|| {
                format!("unable to remove {:?}", absolute_path)
            })
        } else {
            fs::remove_file(&absolute_path).chain_err(|| {
                format!("unable to remove {:?}", absolute_path)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path() {
        let layer = NFSAbstractionLayer::new(Path::new("/mnt/share"));

        let abs = layer.absolute_path(Path::new("/jobs/out")).unwrap();
        assert_eq!(PathBuf::from("/mnt/share/jobs/out"), abs);

        let rel = layer.absolute_path(Path::new("jobs/out")).unwrap();
        assert_eq!(PathBuf::from("/mnt/share/jobs/out"), rel);
    }

    #[test]
    fn test_abstracted_path() {
        let layer = NFSAbstractionLayer::new(Path::new("/mnt/share"));

        let path = layer
            .abstracted_path(Path::new("/mnt/share/jobs/out"))
            .unwrap();
        assert_eq!(PathBuf::from("/jobs/out"), path);
    }
}
