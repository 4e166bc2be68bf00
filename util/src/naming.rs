//! Master discovery. The cluster's naming service maps well-known keys to
//! endpoints; the master publishes itself under one and minions look it
//! up. Only the lookup interface is fixed here; the backing store is a
//! collaborator.

use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use errors::*;

pub trait NameService: Send + Sync {
    /// Returns the value stored under `key`, or `None` if nothing is
    /// registered there.
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Naming backed by a directory on a shared filesystem: one file per key.
pub struct FileNameService {
    root: PathBuf,
}

impl FileNameService {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        FileNameService { root: root.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_matches('/'))
    }
}

impl NameService for FileNameService {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).chain_err(|| {
            format!("unable to read name entry {:?}", path)
        })?;
        let value = contents.trim();
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(value.to_owned()))
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).chain_err(
                || "unable to create naming directory",
            )?;
        }
        let mut file = File::create(&path).chain_err(|| {
            format!("unable to create name entry {:?}", path)
        })?;
        file.write_all(value.as_bytes()).chain_err(|| {
            format!("unable to write name entry {:?}", path)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;

    #[test]
    fn test_put_then_get() {
        let root = env::temp_dir().join("naming-put-get");
        let naming = FileNameService::new(root);

        naming.put("/cluster/master", "worker-7:9917").unwrap();
        let endpoint = naming.get("/cluster/master").unwrap();
        assert_eq!(Some("worker-7:9917".to_owned()), endpoint);
    }

    #[test]
    fn test_get_missing_key() {
        let root = env::temp_dir().join("naming-missing");
        let naming = FileNameService::new(root);

        assert_eq!(None, naming.get("/cluster/nobody").unwrap());
    }
}
