//! Persistence of scripts, archived inputs and execution logs

use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::{Error, Result};

/// Lines of stored scripts starting with this prefix are ignored
pub const COMMENT_PREFIX: &str = "%%%";

/// Identity of the caller a run is performed for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    /// Wrap an identity string
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// The identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend storing scripts, inputs and output logs
pub trait ScriptStorage: fmt::Debug + Send {
    /// Resolve the storage root and the identity of `caller`
    fn prepare(&mut self, caller: &str) -> Result<CallerIdentity>;

    /// Archive the script buffer a run was started with
    fn write_input(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Store the execution log of a run
    fn write_output(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Load a stored script, decoding its hex text
    fn read_script(&self, name: &str) -> Result<Bytes>;

    /// Load the execution log stored for `name`
    fn read_output(&self, name: &str) -> Result<Option<String>>;

    /// Names of the stored scripts
    fn list_scripts(&self) -> Result<Vec<String>>;
}

/// Decode script text, dropping lines that start with `comment_prefix`
pub fn parse_script(name: &str, text: &str, comment_prefix: &str) -> Result<Bytes> {
    let hex_text: String = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with(comment_prefix))
        .flat_map(|line| line.chars().filter(|c| !c.is_whitespace()))
        .collect();

    hex::decode(hex_text)
        .map(Bytes::from)
        .map_err(|source| Error::InvalidScript {
            name: name.to_string(),
            source,
        })
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Filesystem backed storage
///
/// ```text
/// <root>/scripts/<name>   hex script text
/// <root>/input/<name>     archived script buffers
/// <root>/output/<name>    execution logs
/// ```
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    comment_prefix: String,
    prepared: bool,
}

impl FileStorage {
    /// Create a storage rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            comment_prefix: COMMENT_PREFIX.to_string(),
            prepared: false,
        }
    }

    /// Use a different comment prefix for stored scripts
    pub fn with_comment_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.comment_prefix = prefix.into();
        self
    }

    /// The storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, dir: &str, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(dir).join(name))
    }

    fn write(&self, dir: &str, name: &str, data: &[u8]) -> Result<()> {
        if !self.prepared {
            return Err(Error::NotPrepared);
        }
        let path = self.path(dir, name)?;
        debug!(path = %path.display(), len = data.len(), "Writing file");
        fs::write(path, data)?;
        Ok(())
    }
}

impl ScriptStorage for FileStorage {
    fn prepare(&mut self, caller: &str) -> Result<CallerIdentity> {
        if caller.is_empty() {
            return Err(Error::InvalidName(caller.to_string()));
        }
        for dir in ["scripts", "input", "output"] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        self.prepared = true;
        Ok(CallerIdentity::new(caller))
    }

    fn write_input(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.write("input", name, data)
    }

    fn write_output(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.write("output", name, data)
    }

    fn read_script(&self, name: &str) -> Result<Bytes> {
        let text = fs::read_to_string(self.path("scripts", name)?)?;
        parse_script(name, &text, &self.comment_prefix)
    }

    fn read_output(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path("output", name)?) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_scripts(&self) -> Result<Vec<String>> {
        let dir = self.root.join("scripts");
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    scripts: HashMap<String, String>,
    inputs: HashMap<String, Bytes>,
    outputs: HashMap<String, String>,
}

/// In-memory storage
///
/// Clones share their contents, so a handle kept by the caller observes
/// what a run wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script given as hex text
    pub fn with_script(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.inner.lock().scripts.insert(name.into(), text.into());
        self
    }

    /// Archived input for `name`
    pub fn input(&self, name: &str) -> Option<Bytes> {
        self.inner.lock().inputs.get(name).cloned()
    }
}

impl ScriptStorage for MemoryStorage {
    fn prepare(&mut self, caller: &str) -> Result<CallerIdentity> {
        if caller.is_empty() {
            return Err(Error::InvalidName(caller.to_string()));
        }
        Ok(CallerIdentity::new(caller))
    }

    fn write_input(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.inner
            .lock()
            .inputs
            .insert(name.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn write_output(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.inner
            .lock()
            .outputs
            .insert(name.to_string(), String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    fn read_script(&self, name: &str) -> Result<Bytes> {
        let inner = self.inner.lock();
        let text = inner.scripts.get(name).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no script {name}"))
        })?;
        parse_script(name, text, COMMENT_PREFIX)
    }

    fn read_output(&self, name: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().outputs.get(name).cloned())
    }

    fn list_scripts(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.inner.lock().scripts.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
