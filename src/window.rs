use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

/// Virtual-key code of the Control key.
pub const VK_CONTROL: u16 = 0x11;

/// Supplies the current rendered frame of one game window.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<RgbImage>;

    /// False once the window is gone.
    fn is_valid(&self) -> bool;
}

/// Delivers synthetic input to one game window. Coordinates are in the
/// client area of the rendered frame.
pub trait Actuator: Send + Sync {
    fn click(&self, x: u32, y: u32);

    /// Click on the emulator's own chrome (toolbar, title bar buttons).
    fn click_host(&self, x: u32, y: u32) {
        self.click(x, y);
    }

    fn drag(&self, from: (u32, u32), to: (u32, u32), duration_ms: u64);

    /// Positive notches scroll up.
    fn scroll(&self, x: u32, y: u32, notches: i32);

    fn key_down(&self, vk: u16);

    fn key_up(&self, vk: u16);

    fn focus(&self) {}
}

/// A bound game window.
#[derive(Clone)]
pub struct WindowTarget {
    pub title: String,
    frames: Arc<dyn FrameSource>,
    input: Arc<dyn Actuator>,
}

impl WindowTarget {
    pub fn new(title: impl Into<String>, frames: Arc<dyn FrameSource>, input: Arc<dyn Actuator>) -> Self {
        Self {
            title: title.into(),
            frames,
            input,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.frames.is_valid()
    }

    pub fn capture(&self) -> Result<RgbImage> {
        self.frames.capture()
    }

    pub fn input(&self) -> &dyn Actuator {
        self.input.as_ref()
    }
}

impl fmt::Debug for WindowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowTarget")
            .field("title", &self.title)
            .field("valid", &self.is_valid())
            .finish()
    }
}
