//! Where finished collections go.
//!
//! The orchestrator fills in `Collection::location` from the distribution
//! template before calling [`Storage::store`]; backends never compute names.

use crate::error::SquareError;
use crate::model::Collection;
use crate::pipeline::BuildContext;
use log::{debug, info};
use std::sync::{Arc, Mutex};

pub trait Storage: Send + Sync {
    fn store(&self, context: &BuildContext<'_>, collection: &Collection) -> Result<(), SquareError>;
}

/// Writes every collection to its location, creating parent directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskStorage;

impl Storage for DiskStorage {
    fn store(&self, _context: &BuildContext<'_>, collection: &Collection) -> Result<(), SquareError> {
        let Some(location) = &collection.location else {
            return Err(SquareError::Storage {
                location: Default::default(),
                message: format!(
                    "no destination for the {} {} output",
                    collection.distribution, collection.extension
                ),
            });
        };

        if let Some(parent) = location.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SquareError::io(parent, e))?;
        }
        std::fs::write(location, &collection.content).map_err(|e| SquareError::io(location, e))?;

        info!(
            "wrote {} ({} bytes)",
            location.display(),
            collection.content.len()
        );
        Ok(())
    }
}

/// Keeps collections in memory. Clones share the same buffer, so a handle
/// kept outside the orchestrator sees everything it stored.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    collections: Arc<Mutex<Vec<Collection>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collections(&self) -> Vec<Collection> {
        self.collections
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn clear(&self) {
        match self.collections.lock() {
            Ok(mut c) => c.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl Storage for MemoryStorage {
    fn store(&self, _context: &BuildContext<'_>, collection: &Collection) -> Result<(), SquareError> {
        let mut collections = self.collections.lock().map_err(|_| SquareError::Storage {
            location: collection.location.clone().unwrap_or_default(),
            message: "memory storage lock poisoned".to_string(),
        })?;
        debug!(
            "stored {} {} in memory",
            collection.distribution, collection.extension
        );
        collections.push(collection.clone());
        Ok(())
    }
}
