use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use winit::{
    event::*,
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

use gltf_ibl_viewer::{environment::Environment, model::Model, Viewer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// glTF model to view (.gltf or .glb)
    #[arg(default_value = "assets/models/DamagedHelmet.glb")]
    model: PathBuf,

    /// Equirectangular HDR environment panorama
    #[arg(long, default_value = "assets/environments/helipad.hdr")]
    environment: PathBuf,

    /// Renderer backend name
    #[arg(long)]
    backend: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let model = Model::load(&args.model)?;
    let environment = Environment::load(&args.environment)?;

    let event_loop = winit::event_loop::EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title("glTF Viewer")
        .build(&event_loop)?;

    let mut viewer = Viewer::new(window, args.backend.as_deref(), model, environment)?;

    let mut shift_held = false;
    let mut left_held = false;
    let mut middle_held = false;
    let mut right_held = false;

    event_loop.run(move |event, window_target| {
        match event {
            Event::WindowEvent { window_id, event } if window_id == viewer.window().id() => {
                match event {
                    WindowEvent::ModifiersChanged(modifiers) => {
                        shift_held = modifiers.state().shift_key();
                    }
                    WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                physical_key: PhysicalKey::Code(key_code),
                                state: ElementState::Pressed,
                                ..
                            },
                        ..
                    } => match key_code {
                        KeyCode::Escape => window_target.exit(),
                        KeyCode::KeyA if shift_held => viewer.reset_orientation(),
                        KeyCode::KeyA => viewer.toggle_animation(),
                        KeyCode::KeyB => viewer.cycle_backend(),
                        KeyCode::KeyR => viewer.reload_shaders(),
                        KeyCode::Home => viewer.reframe_camera(),
                        _ => {}
                    },
                    WindowEvent::MouseInput { state, button, .. } => {
                        let pressed = state == ElementState::Pressed;
                        match button {
                            MouseButton::Left => left_held = pressed,
                            MouseButton::Middle => middle_held = pressed,
                            MouseButton::Right => right_held = pressed,
                            _ => {}
                        }
                    }
                    WindowEvent::MouseWheel { delta, .. } => {
                        let scroll = match delta {
                            MouseScrollDelta::LineDelta(_, y) => y * 40.0,
                            MouseScrollDelta::PixelDelta(position) => position.y as f32,
                        };
                        viewer.zoom(0, scroll as i32);
                    }
                    WindowEvent::DroppedFile(path) => {
                        viewer.handle_dropped_file(&path);
                        viewer.window().request_redraw();
                    }
                    WindowEvent::CloseRequested => window_target.exit(),
                    WindowEvent::Resized(new_size) => {
                        viewer.resize(new_size.width, new_size.height);
                    }
                    WindowEvent::RedrawRequested => {
                        if let Err(error) = viewer.render_frame() {
                            log::error!("Render failed: {error:#}");
                            window_target.exit();
                        }
                    }
                    _ => {}
                }
            }
            Event::DeviceEvent {
                event: DeviceEvent::MouseMotion { delta },
                ..
            } => {
                let (dx, dy) = (delta.0 as i32, delta.1 as i32);
                if left_held {
                    viewer.tumble(dx, dy);
                } else if middle_held {
                    viewer.pan(dx, dy);
                } else if right_held {
                    viewer.zoom(dx, dy);
                }
            }
            Event::AboutToWait => {
                viewer.window().request_redraw();
            }
            _ => {}
        }
    })?;

    Ok(())
}
