use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use zookeepr_core::{filter_by_criteria, find_by_id, Animal, AnimalCriteria, KernelError};
use zookeepr_store_json::{AnimalStore, IntegrityReport};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone)]
pub struct AnimalApi {
    store: Arc<AnimalStore>,
}

impl AnimalApi {
    #[must_use]
    pub fn new(store: Arc<AnimalStore>) -> Self {
        Self { store }
    }

    /// Load the backing document at `path` and wrap it.
    ///
    /// # Errors
    /// Returns an error when the document is missing or malformed.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(AnimalStore::open(path)?)))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<AnimalStore> {
        &self.store
    }

    /// Records matching every active filter, in insertion order.
    ///
    /// # Errors
    /// Returns an error when the store snapshot cannot be read.
    pub fn list_animals(&self, criteria: &AnimalCriteria) -> Result<Vec<Animal>> {
        let animals = self.store.snapshot()?;
        Ok(filter_by_criteria(criteria, &animals))
    }

    /// One record by id, or `None` when absent.
    ///
    /// # Errors
    /// Returns an error when the store snapshot cannot be read.
    pub fn get_animal(&self, id: &str) -> Result<Option<Animal>> {
        let animals = self.store.snapshot()?;
        Ok(find_by_id(id, &animals).cloned())
    }

    /// Validate and append one candidate, returning the stored record.
    ///
    /// # Errors
    /// Returns [`KernelError::Validation`] when `candidate` is not an object or fails
    /// validation, and a persistence error when the backing document cannot be written.
    pub fn create_animal(&self, candidate: Value) -> Result<Animal> {
        let Value::Object(candidate) = candidate else {
            return Err(KernelError::Validation("animal MUST be a JSON object".to_string()).into());
        };
        self.store.append(candidate)
    }

    /// # Errors
    /// Returns an error when the store snapshot cannot be read.
    pub fn animal_count(&self) -> Result<usize> {
        self.store.len()
    }

    /// # Errors
    /// Returns an error when the integrity probe fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.store.integrity_check()
    }
}
