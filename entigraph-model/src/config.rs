use crate::mapper::SERIALIZE_DEPTH_MAXIMUM;

/// Runtime knobs of an [`EntityManager`](crate::EntityManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Hard bound on serialization depth. Requested depths above it are
    /// clamped.
    pub max_serialize_depth: usize,
    /// Scenario used by deserialization when the caller names none. Only
    /// fields ignored unconditionally are skipped under it.
    pub default_scenario: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_serialize_depth: SERIALIZE_DEPTH_MAXIMUM,
            default_scenario: "*".to_string(),
        }
    }
}

impl ModelConfig {
    /// Clamps a requested depth; `None` asks for the maximum.
    #[must_use]
    pub fn effective_depth(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(depth) if depth <= self.max_serialize_depth => depth,
            _ => self.max_serialize_depth,
        }
    }
}
