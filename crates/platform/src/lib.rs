//! Window and input handling for the GPU samples.
//!
//! This crate provides:
//! - A winit window that hands out the raw handles surface creation needs
//! - Keyboard state fed from window events

mod input;
mod window;

pub use input::{InputState, KeyCode};
pub use window::Window;

pub use winit::application::ApplicationHandler;
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
pub use winit::window::WindowId;
