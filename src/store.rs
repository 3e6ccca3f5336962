//! YAML-backed store of stack definitions
//!
//! The file is the single source of truth: every read parses it again and
//! every mutation is a load-modify-save cycle done under one writer lock.
//! Saves go through a temporary file in the same directory followed by a
//! rename, so readers never see a half-written document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A configured stack, keyed by its unique name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDefinition {
    /// Name of the stack (the map key in the file)
    #[serde(skip)]
    pub name: String,
    /// Directory holding the compose file
    pub path: String,
    /// Compose project id the runtime labels containers with
    pub project: String,
}

impl StackDefinition {
    pub fn new(name: impl Into<String>, path: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            project: project.into(),
        }
    }
}

/// Errors from store operations. The messages are shown to dashboard users.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("El stack '{0}' ya existe.")]
    Duplicate(String),

    #[error("El stack '{0}' no existe.")]
    NotFound(String),

    #[error("El campo '{0}' no puede estar vacío.")]
    EmptyField(&'static str),

    #[error("No se pudo acceder a la configuración: {0}")]
    Io(#[from] std::io::Error),

    #[error("La configuración no es YAML válido: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// On-disk layout: `stacks` plus any other top-level keys, kept verbatim
#[derive(Debug, Default, Serialize, Deserialize)]
struct StackFile {
    #[serde(default, deserialize_with = "null_as_empty")]
    stacks: BTreeMap<String, StackDefinition>,

    #[serde(flatten)]
    other: BTreeMap<String, serde_yaml::Value>,
}

/// Store of stack definitions persisted in a YAML file
pub struct StackStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stacks, sorted by name. A missing file is an empty store.
    pub fn load(&self) -> Result<Vec<StackDefinition>, StoreError> {
        Ok(self.read_file()?.stacks.into_values().collect())
    }

    /// Stack with exactly this name
    pub fn get(&self, name: &str) -> Result<Option<StackDefinition>, StoreError> {
        Ok(self.read_file()?.stacks.remove(name))
    }

    /// Stack whose name matches `label` ignoring ASCII case
    pub fn find(&self, label: &str) -> Result<Option<StackDefinition>, StoreError> {
        Ok(self
            .read_file()?
            .stacks
            .into_values()
            .find(|stack| stack.name.eq_ignore_ascii_case(label)))
    }

    /// Add a new stack; the name must not be taken, ignoring ASCII case
    pub async fn add(&self, stack: StackDefinition) -> Result<(), StoreError> {
        let name = required("name", &stack.name)?.to_string();
        let path = required("path", &stack.path)?.to_string();
        let project = required("project", &stack.project)?.to_string();

        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file()?;
        // Host labels resolve ignoring case, so names must be unique that way too
        if let Some(existing) = file
            .stacks
            .keys()
            .find(|key| key.eq_ignore_ascii_case(&name))
        {
            return Err(StoreError::Duplicate(existing.clone()));
        }
        file.stacks
            .insert(name.clone(), StackDefinition::new(name.clone(), path, project));
        self.write_file(&file)?;

        info!(stack = %name, "Stack added");
        Ok(())
    }

    /// Replace path and project of an existing stack
    pub async fn edit(&self, name: &str, path: &str, project: &str) -> Result<(), StoreError> {
        let path = required("path", path)?;
        let project = required("project", project)?;

        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file()?;
        match file.stacks.get_mut(name) {
            Some(stack) => {
                stack.path = path.to_string();
                stack.project = project.to_string();
            }
            None => return Err(StoreError::NotFound(name.to_string())),
        }
        self.write_file(&file)?;

        info!(stack = %name, "Stack updated");
        Ok(())
    }

    /// Remove a stack
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file()?;
        if file.stacks.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.write_file(&file)?;

        info!(stack = %name, "Stack deleted");
        Ok(())
    }

    /// Write an example store if the file does not exist yet.
    /// Returns whether a file was created.
    pub async fn ensure_example(&self) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.path.exists() {
            return Ok(false);
        }

        let mut file = StackFile::default();
        file.stacks.insert(
            "ejemplo_stack".to_string(),
            StackDefinition::new("ejemplo_stack", "/ruta/al/docker-compose.yml", "nombre_proyecto"),
        );
        self.write_file(&file)?;

        info!(path = %self.path.display(), "Example stack store created");
        Ok(true)
    }

    fn read_file(&self) -> Result<StackFile, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Stack store missing, treating as empty");
                return Ok(StackFile::default());
            }
            Err(e) => return Err(e.into()),
        };

        // An empty document deserializes to nothing rather than a mapping
        if content.trim().is_empty() {
            return Ok(StackFile::default());
        }

        let mut file: StackFile = serde_yaml::from_str(&content)?;
        for (name, stack) in file.stacks.iter_mut() {
            stack.name = name.clone();
        }
        Ok(file)
    }

    fn write_file(&self, file: &StackFile) -> Result<(), StoreError> {
        let yaml = serde_yaml::to_string(file)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), stacks = file.stacks.len(), "Stack store saved");
        Ok(())
    }
}

// `stacks:` with no entries parses as null
fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, StackDefinition>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, StoreError> {
    let value = value.trim();
    if value.is_empty() {
        Err(StoreError::EmptyField(field))
    } else {
        Ok(value)
    }
}
