//! Boundary to the expensive attribute sources. The engine owns no I/O:
//! checksums, image dimensions and similarity descriptors all come from
//! a provider supplied by the embedding application.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::core::item::FileMeta;
use crate::core::similarity::SimilarityData;

/// Supplies lazily computed attributes during the setup phase of a
/// matching pass. `Ok(None)` means the attribute is unavailable for the
/// file; an `Err` is logged by the engine and treated the same way.
pub trait AttributeProvider: Send {
    fn checksum(&mut self, file: &FileMeta) -> Result<Option<String>>;
    fn dimensions(&mut self, file: &FileMeta) -> Result<Option<(u32, u32)>>;
    fn similarity_data(&mut self, file: &FileMeta) -> Result<Option<Arc<SimilarityData>>>;
}

/// Provider without any attribute source; only the always-available
/// file metadata criteria can match.
#[derive(Debug, Default)]
pub struct NullProvider;

impl AttributeProvider for NullProvider {
    fn checksum(&mut self, _file: &FileMeta) -> Result<Option<String>> {
        Ok(None)
    }

    fn dimensions(&mut self, _file: &FileMeta) -> Result<Option<(u32, u32)>> {
        Ok(None)
    }

    fn similarity_data(&mut self, _file: &FileMeta) -> Result<Option<Arc<SimilarityData>>> {
        Ok(None)
    }
}

/// Provider backed by pre-computed per-path maps. Used by tests and by
/// callers that batch-compute attributes ahead of a pass.
#[derive(Debug, Default)]
pub struct StaticProvider {
    checksums: HashMap<String, String>,
    dimensions: HashMap<String, (u32, u32)>,
    descriptors: HashMap<String, Arc<SimilarityData>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_checksum(&mut self, path: impl Into<String>, sum: impl Into<String>) {
        self.checksums.insert(path.into(), sum.into());
    }

    pub fn set_dimensions(&mut self, path: impl Into<String>, width: u32, height: u32) {
        self.dimensions.insert(path.into(), (width, height));
    }

    pub fn set_similarity_data(&mut self, path: impl Into<String>, simd: SimilarityData) {
        self.descriptors.insert(path.into(), Arc::new(simd));
    }
}

impl AttributeProvider for StaticProvider {
    fn checksum(&mut self, file: &FileMeta) -> Result<Option<String>> {
        Ok(self.checksums.get(&file.path).cloned())
    }

    fn dimensions(&mut self, file: &FileMeta) -> Result<Option<(u32, u32)>> {
        Ok(self.dimensions.get(&file.path).copied())
    }

    fn similarity_data(&mut self, file: &FileMeta) -> Result<Option<Arc<SimilarityData>>> {
        Ok(self.descriptors.get(&file.path).cloned())
    }
}
