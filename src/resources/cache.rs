//! Compiled shader cache keyed by shader identity
//!
//! Failed compilations are cached too, so a broken shader is reported once
//! and the material stays unavailable until its source changes.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::backend::{BackendError, GraphicsBackend, ShaderHandle, ShaderSource, ShaderStage};
use crate::error::Result;

/// Identity of a shader: its name, pipeline stage and a hash of the code.
///
/// Two sources sharing a name but not their code get separate entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub name: String,
    pub stage: ShaderStage,
    pub source_hash: u64,
}

impl ShaderKey {
    pub fn of(source: &ShaderSource) -> Self {
        let mut hasher = DefaultHasher::new();
        source.entry_point.hash(&mut hasher);
        source.code.hash(&mut hasher);
        Self {
            name: source.name.clone(),
            stage: source.stage,
            source_hash: hasher.finish(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ShaderCache {
    entries: HashMap<ShaderKey, Option<ShaderHandle>>,
    hits: usize,
    misses: usize,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `source`, compiling it on a miss.
    ///
    /// Returns `Ok(None)` when the shader failed to compile (now or earlier).
    /// Only device loss is reported as an error.
    pub fn get_or_compile(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        source: &ShaderSource,
    ) -> Result<Option<ShaderHandle>> {
        let key = ShaderKey::of(source);
        if let Some(entry) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(*entry);
        }

        self.misses += 1;
        let entry = match backend.compile_shader(source) {
            Ok(handle) => {
                log::debug!("Compiled {:?} shader '{}'", source.stage, source.name);
                Some(handle)
            }
            Err(BackendError::DeviceLost) => return Err(BackendError::DeviceLost.into()),
            Err(e) => {
                log::warn!("Shader '{}' failed to compile: {}", source.name, e);
                None
            }
        };
        self.entries.insert(key, entry);
        Ok(entry)
    }

    /// Forget every stage and revision compiled from shaders named `name`.
    pub fn invalidate(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.name != name);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, key: &ShaderKey) -> Option<Option<ShaderHandle>> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.is_none()).count()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }
}
