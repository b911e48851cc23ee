//! # Layer Registry
//!
//! The ordered layer list. The logic thread edits it; the render thread
//! takes a snapshot per frame, rebuilt only after an edit.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{RenderError, RenderResult};
use crate::layer::LayerRenderer;

pub(crate) struct LayerSlot {
    pub(crate) renderer: Box<dyn LayerRenderer>,
    pub(crate) initialized: bool,
    pub(crate) enabled: bool,
}

struct LayerShared {
    name: String,
    slot: Mutex<LayerSlot>,
}

/// Shared handle to a layer. Identity is the instance, not the name.
#[derive(Clone)]
pub struct LayerHandle(Arc<LayerShared>);

impl LayerHandle {
    /// Wraps a renderer.
    #[must_use]
    pub fn new(renderer: impl LayerRenderer + 'static) -> Self {
        Self::from_box(Box::new(renderer))
    }

    /// Wraps a boxed renderer.
    #[must_use]
    pub fn from_box(renderer: Box<dyn LayerRenderer>) -> Self {
        Self(Arc::new(LayerShared {
            name: renderer.name().to_owned(),
            slot: Mutex::new(LayerSlot {
                renderer,
                initialized: false,
                enabled: true,
            }),
        }))
    }

    /// Layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether the layer is drawn.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.0.slot.lock().enabled
    }

    /// Shows or hides the layer.
    pub fn set_enabled(&self, enabled: bool) {
        self.0.slot.lock().enabled = enabled;
    }

    /// Whether `setup` has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.0.slot.lock().initialized
    }

    /// Runs `f` on the renderer.
    pub fn with_renderer<R>(&self, f: impl FnOnce(&mut dyn LayerRenderer) -> R) -> R {
        f(self.0.slot.lock().renderer.as_mut())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, LayerSlot> {
        self.0.slot.lock()
    }
}

impl PartialEq for LayerHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for LayerHandle {}

impl std::fmt::Debug for LayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LayerHandle").field(&self.0.name).finish()
    }
}

struct RegistryInner {
    layers: Vec<LayerHandle>,
    snapshot: Arc<[LayerHandle]>,
    dirty: bool,
}

/// Ordered list of map layers.
pub struct LayerRegistry {
    inner: Mutex<RegistryInner>,
}

impl LayerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                layers: Vec::new(),
                snapshot: Arc::from(Vec::new()),
                dirty: false,
            }),
        }
    }

    /// Appends a layer on top.
    ///
    /// # Errors
    ///
    /// [`RenderError::LayerAddedTwice`] if this instance is already present.
    pub fn add(&self, layer: LayerHandle) -> RenderResult<()> {
        let len = self.len();
        self.insert(len, layer)
    }

    /// Inserts a layer at `index` (0 is drawn first).
    ///
    /// # Errors
    ///
    /// [`RenderError::LayerAddedTwice`] for duplicates,
    /// [`RenderError::LayerIndex`] past the end.
    pub fn insert(&self, index: usize, layer: LayerHandle) -> RenderResult<()> {
        let mut inner = self.inner.lock();
        let len = inner.layers.len();
        if index > len {
            return Err(RenderError::LayerIndex { index, len });
        }
        if inner.layers.contains(&layer) {
            return Err(RenderError::LayerAddedTwice(layer.name().to_owned()));
        }
        tracing::debug!(layer = layer.name(), index, "layer added");
        inner.layers.insert(index, layer);
        inner.dirty = true;
        Ok(())
    }

    /// Replaces the layer at `index`, returning the old one.
    ///
    /// # Errors
    ///
    /// [`RenderError::LayerAddedTwice`] if `layer` sits at another index,
    /// [`RenderError::LayerIndex`] past the end.
    pub fn set(&self, index: usize, layer: LayerHandle) -> RenderResult<LayerHandle> {
        let mut inner = self.inner.lock();
        let len = inner.layers.len();
        if index >= len {
            return Err(RenderError::LayerIndex { index, len });
        }
        if let Some(existing) = inner.layers.iter().position(|l| *l == layer) {
            if existing != index {
                return Err(RenderError::LayerAddedTwice(layer.name().to_owned()));
            }
        }
        inner.dirty = true;
        Ok(std::mem::replace(&mut inner.layers[index], layer))
    }

    /// Removes the layer at `index`.
    ///
    /// # Errors
    ///
    /// [`RenderError::LayerIndex`] past the end.
    pub fn remove(&self, index: usize) -> RenderResult<LayerHandle> {
        let mut inner = self.inner.lock();
        let len = inner.layers.len();
        if index >= len {
            return Err(RenderError::LayerIndex { index, len });
        }
        inner.dirty = true;
        let layer = inner.layers.remove(index);
        tracing::debug!(layer = layer.name(), "layer removed");
        Ok(layer)
    }

    /// Removes `layer` wherever it is. Returns whether it was present.
    pub fn remove_layer(&self, layer: &LayerHandle) -> bool {
        let mut inner = self.inner.lock();
        let Some(index) = inner.layers.iter().position(|l| l == layer) else {
            return false;
        };
        inner.layers.remove(index);
        inner.dirty = true;
        true
    }

    /// Layer at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<LayerHandle> {
        self.inner.lock().layers.get(index).cloned()
    }

    /// Position of `layer`.
    #[must_use]
    pub fn index_of(&self, layer: &LayerHandle) -> Option<usize> {
        self.inner.lock().layers.iter().position(|l| l == layer)
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().layers.len()
    }

    /// No layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().layers.is_empty()
    }

    /// Render-order snapshot, rebuilt only after an edit.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[LayerHandle]> {
        let mut inner = self.inner.lock();
        if inner.dirty {
            inner.snapshot = Arc::from(inner.layers.as_slice());
            inner.dirty = false;
        }
        Arc::clone(&inner.snapshot)
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
