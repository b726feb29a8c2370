use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, info};

use crate::agent::BoxFuture;

pub const DEFAULT_ROOT: &str = "/sentinel";

pub const FLOW_RULES_DATA_ID: &str = "/rules/flow-rules";
pub const DEGRADE_RULES_DATA_ID: &str = "/rules/degrade-rules";
pub const CLIENT_CONFIG_DATA_ID: &str = "/cluster-client-config";
pub const CLUSTER_MAP_DATA_ID: &str = "/cluster-map";

/// Node payload file inside a node directory. Child nodes are sibling directories.
const NODE_DATA_FILE: &str = "_data";

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    SerdeJson(serde_json::Error),
    InvalidPath { path: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::SerdeJson(e) => write!(f, "json error: {e}"),
            Self::InvalidPath { path } => write!(f, "invalid store path: {path}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::SerdeJson(e) => Some(e),
            Self::InvalidPath { .. } => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::SerdeJson(value)
    }
}

/// `{root}/{app}{data_id}` with exactly one `/` between segments that lack one.
pub fn topology_path(root: &str, app: &str, data_id: &str) -> String {
    let mut path = root.to_string();
    push_segment(&mut path, app);
    if !data_id.trim().is_empty() {
        push_segment(&mut path, data_id);
    }
    path
}

fn push_segment(path: &mut String, segment: &str) {
    if !segment.starts_with('/') {
        path.push('/');
    }
    path.push_str(segment);
}

/// Durable, strongly consistent home of per-app configuration blobs.
pub trait TopologyStore: Send + Sync + 'static {
    /// Full node path for `(app, data_id)`.
    fn path_for(&self, app: &str, data_id: &str) -> String;

    /// Creates the node (and its parents) if absent, then overwrites its value.
    fn publish(
        &self,
        app: &str,
        data_id: &str,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Current value of the node, `None` if it was never created.
    fn fetch(
        &self,
        app: &str,
        data_id: &str,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, StoreError>>;
}

/// Maps every node path onto a directory under `base_dir`.
#[derive(Debug, Clone)]
pub struct FileTopologyStore {
    base_dir: PathBuf,
    root: String,
}

impl FileTopologyStore {
    pub fn new(base_dir: impl Into<PathBuf>, root: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            root: root.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn node_dir(&self, path: &str) -> Result<PathBuf, StoreError> {
        let mut dir = self.base_dir.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." || segment.contains('\\') {
                return Err(StoreError::InvalidPath {
                    path: path.to_string(),
                });
            }
            dir.push(segment);
        }
        if dir == self.base_dir {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(dir)
    }

    fn publish_blocking(&self, path: &str, payload: &[u8]) -> Result<(), StoreError> {
        let dir = self.node_dir(path)?;
        let data_path = dir.join(NODE_DATA_FILE);
        if !data_path.exists() {
            fs::create_dir_all(&dir)?;
            // Never truncate: another writer may already have committed a payload.
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&data_path)?;
            info!(path = %path, "created topology node");
        }
        write_atomic(&data_path, payload)?;
        Ok(())
    }

    fn fetch_blocking(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let data_path = self.node_dir(path)?.join(NODE_DATA_FILE);
        match fs::read(&data_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl TopologyStore for FileTopologyStore {
    fn path_for(&self, app: &str, data_id: &str) -> String {
        topology_path(&self.root, app, data_id)
    }

    fn publish(
        &self,
        app: &str,
        data_id: &str,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let path = self.path_for(app, data_id);
        let store = self.clone();
        Box::pin(async move {
            debug!(path = %path, bytes = payload.len(), "publishing topology node");
            tokio::task::spawn_blocking(move || store.publish_blocking(&path, &payload))
                .await
                .map_err(|e| StoreError::Io(io::Error::other(e)))?
        })
    }

    fn fetch(
        &self,
        app: &str,
        data_id: &str,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, StoreError>> {
        let path = self.path_for(app, data_id);
        let store = self.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || store.fetch_blocking(&path))
                .await
                .map_err(|e| StoreError::Io(io::Error::other(e)))?
        })
    }
}

/// In-process store keyed by node path. Keeps a write counter per path.
#[derive(Debug)]
pub struct MemoryTopologyStore {
    root: String,
    nodes: Mutex<BTreeMap<String, MemoryNode>>,
}

#[derive(Debug, Default)]
struct MemoryNode {
    data: Vec<u8>,
    writes: usize,
}

impl MemoryTopologyStore {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.get(path).map(|node| node.data.clone())
    }

    pub fn write_count(&self, path: &str) -> usize {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.get(path).map_or(0, |node| node.writes)
    }

    pub fn paths(&self) -> Vec<String> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.keys().cloned().collect()
    }
}

impl Default for MemoryTopologyStore {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl TopologyStore for MemoryTopologyStore {
    fn path_for(&self, app: &str, data_id: &str) -> String {
        topology_path(&self.root, app, data_id)
    }

    fn publish(
        &self,
        app: &str,
        data_id: &str,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let path = self.path_for(app, data_id);
        Box::pin(async move {
            let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
            let node = nodes.entry(path).or_default();
            node.data = payload;
            node.writes += 1;
            Ok(())
        })
    }

    fn fetch(
        &self,
        app: &str,
        data_id: &str,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, StoreError>> {
        let path = self.path_for(app, data_id);
        Box::pin(async move { Ok(self.get(&path)) })
    }
}

/// Writes `bytes` through a uniquely named sibling temp file, then renames it over `path`.
/// Concurrent writers to the same path never share a temp file, so the last rename wins
/// with a complete payload.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{}.", file_name.to_string_lossy()))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    let _ = tmp.as_file().sync_all();
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
