use std::sync::{Arc, PoisonError, RwLock};

/// A float shared between one writer loop and any number of readers.
///
/// Clones share the same cell. Readers see either the previous or the new
/// value, never a mix of both.
#[derive(Debug, Clone, Default)]
pub struct SharedScalar {
    value: Arc<RwLock<f64>>,
}

impl SharedScalar {
    pub fn new(value: f64) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
        }
    }

    pub fn set(&self, value: f64) {
        // a panicking writer cannot leave an f64 half-written
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn get(&self) -> f64 {
        *self.value.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Latest absolute energy readings in Wh, published at scrape time.
#[derive(Debug, Clone, Default)]
pub struct EnergyRegisters {
    pub total_wh: SharedScalar,
    pub session_wh: SharedScalar,
}
