use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use winit::window::Window;

pub mod environment;
pub mod model;
pub mod renderer;
pub mod scene;

use environment::Environment;
use model::Model;
use renderer::{BackendRegistry, CameraUniforms, Renderer};
use scene::{camera::Camera, FrameClock};

/// Owns the loaded assets, the active renderer, and the interaction
/// state the window event loop drives.
pub struct Viewer {
    window: Arc<Window>,
    registry: BackendRegistry,
    backend_name: String,
    renderer: Box<dyn Renderer>,
    model: Model,
    environment: Environment,
    camera: Camera,
    clock: FrameClock,
    animate: bool,
}

impl Viewer {
    pub fn new(
        window: Window,
        backend: Option<&str>,
        model: Model,
        environment: Environment,
    ) -> Result<Self> {
        let window = Arc::new(window);
        let size = window.inner_size();

        let registry = BackendRegistry::with_builtin_backends();
        let (backend_name, renderer) = registry.create(
            backend.unwrap_or(""),
            window.clone(),
            &environment,
            &model,
        )?;

        let mut camera = Camera::new(size.width, size.height);
        camera.reset_to_model(model.bounds_min, model.bounds_max);

        Ok(Self {
            window,
            registry,
            backend_name,
            renderer,
            model,
            environment,
            camera,
            clock: FrameClock::default(),
            animate: true,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.camera.resize_viewport(width, height);
        self.renderer.resize(width, height);
    }

    pub fn render_frame(&mut self) -> Result<()> {
        let dt = self.clock.tick();
        self.model.update(dt, self.animate);

        let camera = CameraUniforms {
            view: self.camera.view_matrix(),
            projection: self.camera.projection_matrix(),
            position: self.camera.position,
        };
        self.renderer.render(self.model.transform(), &camera)
    }

    pub fn tumble(&mut self, dx: i32, dy: i32) {
        self.camera.tumble(dx, dy);
    }

    pub fn pan(&mut self, dx: i32, dy: i32) {
        self.camera.pan(dx, dy);
    }

    pub fn zoom(&mut self, dx: i32, dy: i32) {
        self.camera.zoom(dx, dy);
    }

    pub fn toggle_animation(&mut self) {
        self.animate = !self.animate;
        log::info!(
            "Animation {}",
            if self.animate { "enabled" } else { "disabled" }
        );
    }

    pub fn reset_orientation(&mut self) {
        self.model.reset_orientation();
    }

    pub fn reframe_camera(&mut self) {
        self.camera
            .reset_to_model(self.model.bounds_min, self.model.bounds_max);
    }

    /// Tears down the active renderer and builds the next registered
    /// backend against the current assets.
    pub fn cycle_backend(&mut self) {
        let Some(next) = self.registry.next_backend(&self.backend_name) else {
            return;
        };
        let next = next.to_string();
        if next == self.backend_name {
            return;
        }
        match self
            .registry
            .create(&next, self.window.clone(), &self.environment, &self.model)
        {
            Ok((name, renderer)) => {
                self.renderer = renderer;
                self.backend_name = name;
                log::info!("Switched to {:?} backend", self.backend_name);
            }
            Err(error) => log::error!("Failed to switch to {next:?} backend: {error:#}"),
        }
    }

    pub fn reload_shaders(&mut self) {
        if let Err(error) = self.renderer.reload_shaders() {
            log::error!("Shader reload failed: {error:#}");
        }
    }

    /// Loads a dropped file by extension. Load failures are logged and
    /// leave the current scene untouched.
    pub fn handle_dropped_file(&mut self, path: &Path) {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let result = match extension.as_str() {
            "glb" | "gltf" => self.load_model(path),
            "hdr" => self.load_environment(path),
            _ => {
                log::warn!("Unsupported file type: {}", path.display());
                Ok(())
            }
        };
        if let Err(error) = result {
            log::error!("Failed to load {}: {error:#}", path.display());
        }
    }

    fn load_model(&mut self, path: &Path) -> Result<()> {
        let model = Model::load(path)?;
        self.renderer.update_model(&model)?;
        self.model = model;
        self.reframe_camera();
        Ok(())
    }

    fn load_environment(&mut self, path: &Path) -> Result<()> {
        let environment = Environment::load(path)?;
        self.renderer.update_environment(&environment)?;
        self.environment = environment;
        Ok(())
    }
}
