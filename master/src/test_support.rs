//! Doubles shared by the master-side unit tests.

use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use charon_proto::job as pb;
use charon_proto::minion as minion_pb;
use minion_interface::MinionRpc;
use util::data_layer::AbstractionLayer;
// The layer trait speaks util's error type, the RPC seam the master's.
use util::errors::{Result, ResultExt};

/// In-memory stand-in for the job filesystem: file sizes are declared up
/// front, writes and removals are recorded for assertions.
pub struct StubLayer {
    sizes: HashMap<PathBuf, u64>,
    pub created: Mutex<Vec<PathBuf>>,
    pub removed: Mutex<Vec<PathBuf>>,
    fail_create: bool,
    output_exists: bool,
}

impl StubLayer {
    pub fn with_files(files: &[(&str, u64)]) -> Self {
        let mut sizes = HashMap::new();
        for &(path, size) in files {
            sizes.insert(PathBuf::from(path), size);
        }
        StubLayer {
            sizes: sizes,
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            fail_create: false,
            output_exists: false,
        }
    }

    pub fn failing_creates(files: &[(&str, u64)]) -> Self {
        let mut layer = StubLayer::with_files(files);
        layer.fail_create = true;
        layer
    }

    pub fn existing_output(files: &[(&str, u64)]) -> Self {
        let mut layer = StubLayer::with_files(files);
        layer.output_exists = true;
        layer
    }
}

impl AbstractionLayer for StubLayer {
    fn open_file(&self, path: &Path) -> Result<File> {
        Err(format!("no such file {:?}", path).into())
    }

    fn create_file(&self, path: &Path) -> Result<File> {
        if self.fail_create {
            return Err(format!("cannot create {:?}", path).into());
        }
        self.created.lock().unwrap().push(PathBuf::from(path));
        File::create(env::temp_dir().join("charon-test-sink"))
            .chain_err(|| "unable to create sink")
    }

    fn read_dir(&self, _path: &Path) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    fn exists(&self, _path: &Path) -> Result<bool> {
        Ok(self.output_exists)
    }

    fn is_file(&self, _path: &Path) -> Result<bool> {
        Ok(true)
    }

    fn is_dir(&self, _path: &Path) -> Result<bool> {
        Ok(false)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(self.sizes.get(path).cloned().unwrap_or(0))
    }

    fn create_dir_all(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.removed.lock().unwrap().push(PathBuf::from(path));
        Ok(())
    }
}

/// Minion RPC double: queries answer with a configurable response,
/// cancellations are recorded.
pub struct RecordingRpc {
    pub query_response: Mutex<minion_pb::QueryResponse>,
    pub cancels: Mutex<Vec<(String, minion_pb::CancelTaskRequest)>>,
}

impl RecordingRpc {
    pub fn new() -> Self {
        RecordingRpc {
            query_response: Mutex::new(minion_pb::QueryResponse::default()),
            cancels: Mutex::new(Vec::new()),
        }
    }
}

impl MinionRpc for RecordingRpc {
    fn query(&self, _endpoint: &str) -> ::errors::Result<minion_pb::QueryResponse> {
        Ok(self.query_response.lock().unwrap().clone())
    }

    fn cancel_task(
        &self,
        endpoint: &str,
        request: &minion_pb::CancelTaskRequest,
    ) -> ::errors::Result<minion_pb::CancelTaskResponse> {
        self.cancels
            .lock()
            .unwrap()
            .push((endpoint.to_owned(), request.clone()));
        Ok(minion_pb::CancelTaskResponse { status: pb::Status::Ok })
    }
}
