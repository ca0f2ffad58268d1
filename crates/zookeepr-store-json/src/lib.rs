use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use zookeepr_core::Animal;

/// On-disk shape of the backing document: `{ "animals": [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnimalDocument {
    pub animals: Vec<Animal>,
}

impl AnimalDocument {
    /// Parse a backing document.
    ///
    /// # Errors
    /// Returns an error when the bytes are not a JSON object with an `animals` array of
    /// well-typed records.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("failed to parse animal document")
    }
}

fn render_document(animals: &[Animal]) -> Result<String> {
    #[derive(Serialize)]
    struct DocumentRef<'a> {
        animals: &'a [Animal],
    }

    serde_json::to_string_pretty(&DocumentRef { animals })
        .context("failed to serialize animal document")
}

/// Persistence port for the record store.
///
/// `overwrite` must complete synchronously: callers treat its return as the point the
/// whole sequence is durable.
pub trait DocumentBackend: Send + Sync {
    /// Read every record from the backing document.
    ///
    /// # Errors
    /// Returns an error when the document is missing or malformed.
    fn load(&self) -> Result<Vec<Animal>>;

    /// Replace the entire backing document with `animals`.
    ///
    /// # Errors
    /// Returns an error when the document cannot be written.
    fn overwrite(&self, animals: &[Animal]) -> Result<()>;

    fn describe(&self) -> String;
}

impl<T: DocumentBackend + ?Sized> DocumentBackend for Arc<T> {
    fn load(&self) -> Result<Vec<Animal>> {
        (**self).load()
    }

    fn overwrite(&self, animals: &[Animal]) -> Result<()> {
        (**self).overwrite(animals)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Backing document stored as a single JSON file.
///
/// Writes truncate and rewrite the file in place; a crash mid-write can leave a
/// truncated document.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentBackend for JsonFileBackend {
    fn load(&self) -> Result<Vec<Animal>> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("failed to read animal document {}", self.path.display()))?;
        let document = AnimalDocument::from_slice(&bytes)
            .with_context(|| format!("invalid animal document {}", self.path.display()))?;
        Ok(document.animals)
    }

    fn overwrite(&self, animals: &[Animal]) -> Result<()> {
        let body = render_document(animals)?;
        fs::write(&self.path, body)
            .with_context(|| format!("failed to write animal document {}", self.path.display()))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    animals: Vec<Animal>,
    last_written: Option<String>,
    write_count: usize,
    fail_writes: bool,
}

/// Backend that keeps the document in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<InMemoryState>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new(animals: Vec<Animal>) -> Self {
        Self { state: Mutex::new(InMemoryState { animals, ..InMemoryState::default() }) }
    }

    fn state(&self) -> Result<MutexGuard<'_, InMemoryState>> {
        self.state.lock().map_err(|_| anyhow!("in-memory document lock poisoned"))
    }

    /// The pretty-printed document from the most recent successful overwrite.
    ///
    /// # Errors
    /// Returns an error when the internal lock is poisoned.
    pub fn written_document(&self) -> Result<Option<String>> {
        Ok(self.state()?.last_written.clone())
    }

    /// Number of successful overwrites so far.
    ///
    /// # Errors
    /// Returns an error when the internal lock is poisoned.
    pub fn write_count(&self) -> Result<usize> {
        Ok(self.state()?.write_count)
    }

    /// Make every subsequent overwrite fail, simulating a full or read-only disk.
    ///
    /// # Errors
    /// Returns an error when the internal lock is poisoned.
    pub fn set_fail_writes(&self, fail_writes: bool) -> Result<()> {
        self.state()?.fail_writes = fail_writes;
        Ok(())
    }
}

impl DocumentBackend for InMemoryBackend {
    fn load(&self) -> Result<Vec<Animal>> {
        Ok(self.state()?.animals.clone())
    }

    fn overwrite(&self, animals: &[Animal]) -> Result<()> {
        let mut state = self.state()?;
        if state.fail_writes {
            return Err(anyhow!("in-memory document rejected write"));
        }
        state.last_written = Some(render_document(animals)?);
        state.animals = animals.to_vec();
        state.write_count += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub backend: String,
    pub animal_count: usize,
    pub duplicate_ids: Vec<String>,
    pub malformed_ids: Vec<String>,
    pub document_sha256: String,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.duplicate_ids.is_empty() && self.malformed_ids.is_empty()
    }
}

/// Ordered, append-only animal collection bound to one backing document.
///
/// Readers take an immutable snapshot; appends are serialized and only published
/// after the backing document has been rewritten.
pub struct AnimalStore {
    backend: Box<dyn DocumentBackend>,
    animals: RwLock<Arc<Vec<Animal>>>,
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for AnimalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimalStore")
            .field("backend", &self.backend.describe())
            .finish_non_exhaustive()
    }
}

impl AnimalStore {
    /// Load the full record set from `backend`.
    ///
    /// # Errors
    /// Returns an error when the backing document is missing or malformed; callers
    /// should treat this as fatal.
    pub fn load(backend: impl DocumentBackend + 'static) -> Result<Self> {
        let animals = backend
            .load()
            .with_context(|| format!("failed to load animals from {}", backend.describe()))?;
        tracing::info!(count = animals.len(), source = %backend.describe(), "loaded animals");

        Ok(Self {
            backend: Box::new(backend),
            animals: RwLock::new(Arc::new(animals)),
            append_lock: Mutex::new(()),
        })
    }

    /// Load from a JSON file on disk.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self> {
        Self::load(JsonFileBackend::new(path))
    }

    /// Consistent view of the collection at the time of the call.
    ///
    /// # Errors
    /// Returns an error when the snapshot lock is poisoned.
    pub fn snapshot(&self) -> Result<Arc<Vec<Animal>>> {
        let animals = self.animals.read().map_err(|_| anyhow!("animal snapshot lock poisoned"))?;
        Ok(Arc::clone(&animals))
    }

    /// Number of records currently published.
    ///
    /// # Errors
    /// Returns an error when the snapshot lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.snapshot()?.len())
    }

    /// True when no records are published.
    ///
    /// # Errors
    /// Returns an error when the snapshot lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.snapshot()?.is_empty())
    }

    #[must_use]
    pub fn backend_description(&self) -> String {
        self.backend.describe()
    }

    /// Validate `candidate`, assign `id = current length`, and persist the whole
    /// collection before publishing it.
    ///
    /// # Errors
    /// Returns [`zookeepr_core::KernelError::Validation`] (inside the `anyhow` error)
    /// when the candidate is malformed, or a persistence error when the overwrite fails.
    /// In both cases the published collection is unchanged.
    pub fn append(&self, candidate: Map<String, Value>) -> Result<Animal> {
        let _guard =
            self.append_lock.lock().map_err(|_| anyhow!("animal store append lock poisoned"))?;

        let current = self.snapshot()?;
        let animal = Animal::from_candidate(current.len().to_string(), candidate)?;

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(animal.clone());

        self.backend.overwrite(&next).with_context(|| {
            format!("failed to persist animal {} to {}", animal.id, self.backend.describe())
        })?;

        let total = next.len();
        *self.animals.write().map_err(|_| anyhow!("animal snapshot lock poisoned"))? =
            Arc::new(next);
        tracing::info!(id = %animal.id, total, "appended animal");

        Ok(animal)
    }

    /// Report duplicate ids, malformed records, and a digest of the current document.
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be read or rendered.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let animals = self.snapshot()?;

        let mut id_counts = BTreeMap::<&str, usize>::new();
        for animal in animals.iter() {
            *id_counts.entry(animal.id.as_str()).or_default() += 1;
        }
        let duplicate_ids = id_counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id.to_string())
            .collect::<Vec<_>>();

        let malformed_ids = animals
            .iter()
            .filter(|animal| !animal.is_well_formed())
            .map(|animal| animal.id.clone())
            .collect::<Vec<_>>();

        let document = render_document(&animals)?;
        let digest = Sha256::digest(document.as_bytes());

        Ok(IntegrityReport {
            backend: self.backend.describe(),
            animal_count: animals.len(),
            duplicate_ids,
            malformed_ids,
            document_sha256: format!("sha256:{}", hex::encode(digest)),
            checked_at: OffsetDateTime::now_utc(),
        })
    }
}
