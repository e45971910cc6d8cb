//! On-screen preview window.

use facewatch_hw::frame::rgb_to_u32;
use facewatch_hw::Frame;
use minifb::{Key, Window, WindowOptions};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("window: {0}")]
    Window(#[from] minifb::Error),
}

/// Interactive frame sink with a polled quit control.
pub trait Display {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError>;

    /// True once the user asked to stop (key `q` or window closed).
    fn quit_requested(&self) -> bool;

    /// Close the window. Safe to call more than once.
    fn release(&mut self);
}

/// `minifb` window, created on the first frame so it matches the frame size.
pub struct PreviewWindow {
    title: String,
    window: Option<Window>,
    closed: bool,
}

impl PreviewWindow {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            window: None,
            closed: false,
        }
    }
}

impl Display for PreviewWindow {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        if self.window.is_none() {
            let window = Window::new(&self.title, w, h, WindowOptions::default())?;
            tracing::info!(title = %self.title, width = w, height = h, "window opened");
            self.window = Some(window);
        }
        if let Some(window) = self.window.as_mut() {
            window.update_with_buffer(&rgb_to_u32(&frame.image), w, h)?;
        }
        Ok(())
    }

    fn quit_requested(&self) -> bool {
        if self.closed {
            return true;
        }
        match &self.window {
            Some(window) => !window.is_open() || window.is_key_down(Key::Q),
            None => false,
        }
    }

    fn release(&mut self) {
        if self.window.take().is_some() {
            tracing::info!(title = %self.title, "window closed");
        }
        self.closed = true;
    }
}
