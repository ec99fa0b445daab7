pub mod webgpu;

use std::sync::Arc;

use anyhow::{bail, Result};
use glam::{Mat4, Vec3};
use winit::window::Window;

use crate::environment::Environment;
use crate::model::Model;

/// Per-frame camera state handed to the renderer by the host.
#[derive(Debug, Clone, Copy)]
pub struct CameraUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
}

/// Abstract renderer contract. Construction through a registry
/// factory performs initialization; dropping the renderer performs
/// shutdown.
pub trait Renderer {
    /// Reconfigures the surface chain for the current window size.
    /// Idempotent; safe to call after an out-of-date surface.
    fn resize(&mut self, width: u32, height: u32);

    /// Renders and presents one frame.
    fn render(&mut self, model_matrix: Mat4, camera: &CameraUniforms) -> Result<()>;

    /// Rebuilds all pipelines from shader source.
    fn reload_shaders(&mut self) -> Result<()>;

    /// Releases and rebuilds every model-lifetime GPU resource.
    fn update_model(&mut self, model: &Model) -> Result<()>;

    /// Releases and rebuilds every environment-lifetime GPU resource.
    fn update_environment(&mut self, environment: &Environment) -> Result<()>;
}

pub type BackendFactory =
    Box<dyn Fn(Arc<Window>, &Environment, &Model) -> Result<Box<dyn Renderer>>>;

/// Name-to-factory table for renderer backends. Backends register
/// explicitly at startup; the order of registration is the cycling
/// order.
pub struct BackendRegistry {
    backends: Vec<(String, BackendFactory)>,
    default_backend: String,
}

impl BackendRegistry {
    pub fn new(default_backend: &str) -> Self {
        Self {
            backends: Vec::new(),
            default_backend: default_backend.to_string(),
        }
    }

    /// A registry with every built-in backend registered.
    pub fn with_builtin_backends() -> Self {
        let mut registry = Self::new(webgpu::BACKEND_NAME);
        registry
            .register(webgpu::BACKEND_NAME, Box::new(webgpu::create_renderer))
            .expect("empty registry cannot hold duplicates");
        registry
    }

    pub fn register(&mut self, name: &str, factory: BackendFactory) -> Result<()> {
        if self.backends.iter().any(|(existing, _)| existing == name) {
            log::error!("Backend {name:?} is already registered");
            bail!("Backend {name:?} is already registered");
        }
        self.backends.push((name.to_string(), factory));
        Ok(())
    }

    /// Instantiates the named backend, or the default when `name` is
    /// empty. Returns the canonical backend name with the renderer.
    pub fn create(
        &self,
        name: &str,
        window: Arc<Window>,
        environment: &Environment,
        model: &Model,
    ) -> Result<(String, Box<dyn Renderer>)> {
        let (name, factory) = self.resolve(name)?;
        log::info!("Creating {name:?} renderer");
        let renderer = factory(window, environment, model)?;
        Ok((name.to_string(), renderer))
    }

    fn resolve(&self, name: &str) -> Result<(&str, &BackendFactory)> {
        if self.backends.is_empty() {
            bail!("No renderer backends are registered");
        }

        let name = if name.is_empty() {
            &self.default_backend
        } else {
            name
        };

        match self.backends.iter().find(|(n, _)| n == name) {
            Some((n, factory)) => Ok((n, factory)),
            None => bail!(
                "Unknown backend {:?}, available: {}",
                name,
                self.available_backends().join(", ")
            ),
        }
    }

    pub fn available_backends(&self) -> Vec<String> {
        self.backends.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Name following `current` in registration order, wrapping.
    pub fn next_backend(&self, current: &str) -> Option<&str> {
        if self.backends.is_empty() {
            return None;
        }
        let position = self
            .backends
            .iter()
            .position(|(name, _)| name == current)
            .unwrap_or(self.backends.len() - 1);
        let next = (position + 1) % self.backends.len();
        Some(&self.backends[next].0)
    }

    #[cfg(test)]
    fn names(&self) -> std::collections::HashSet<&str> {
        self.backends.iter().map(|(n, _)| n.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_factory() -> BackendFactory {
        Box::new(|_, _, _| bail!("not constructible in tests"))
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = BackendRegistry::new("first");
        registry.register("first", failing_factory()).unwrap();
        assert!(registry.register("first", failing_factory()).is_err());
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn test_available_backends_in_registration_order() {
        let mut registry = BackendRegistry::new("a");
        registry.register("a", failing_factory()).unwrap();
        registry.register("b", failing_factory()).unwrap();
        assert_eq!(registry.available_backends(), vec!["a", "b"]);
    }

    #[test]
    fn test_next_backend_cycles_with_wraparound() {
        let mut registry = BackendRegistry::new("a");
        registry.register("a", failing_factory()).unwrap();
        registry.register("b", failing_factory()).unwrap();
        registry.register("c", failing_factory()).unwrap();

        assert_eq!(registry.next_backend("a"), Some("b"));
        assert_eq!(registry.next_backend("b"), Some("c"));
        assert_eq!(registry.next_backend("c"), Some("a"));
    }

    #[test]
    fn test_resolve_empty_registry_fails() {
        let registry = BackendRegistry::new("a");
        let err = registry.resolve("").err().unwrap();
        assert!(err.to_string().contains("No renderer backends"));
    }

    #[test]
    fn test_resolve_empty_name_picks_default() {
        let mut registry = BackendRegistry::new("b");
        registry.register("a", failing_factory()).unwrap();
        registry.register("b", failing_factory()).unwrap();
        let (name, _) = registry.resolve("").unwrap();
        assert_eq!(name, "b");
    }

    #[test]
    fn test_resolve_unknown_name_lists_available() {
        let mut registry = BackendRegistry::new("a");
        registry.register("a", failing_factory()).unwrap();
        let err = registry.resolve("nope").err().unwrap();
        let message = err.to_string();
        assert!(message.contains("Unknown backend"));
        assert!(message.contains("a"));
    }

    #[test]
    fn test_next_backend_on_empty_registry() {
        let registry = BackendRegistry::new("a");
        assert_eq!(registry.next_backend("a"), None);
    }

    #[test]
    fn test_builtin_registry_contains_default() {
        let registry = BackendRegistry::with_builtin_backends();
        assert!(registry.names().contains(webgpu::BACKEND_NAME));
    }
}
