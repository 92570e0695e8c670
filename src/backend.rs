use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use image::RgbImage;

use crate::settings::WindowBinding;
use crate::window::{Actuator, FrameSource, WindowTarget};

/// Frames read from a directory the emulator (or a capture helper) keeps
/// writing screenshots into. The newest PNG is the current frame.
#[derive(Debug, Clone)]
pub struct DirectoryFrames {
    dir: PathBuf,
}

impl DirectoryFrames {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn latest(&self) -> Result<PathBuf> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read {}", self.dir.display()))?;

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_png(&entry.path()))
            .filter_map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, entry.path()))
            })
            .max_by_key(|(modified, _): &(SystemTime, PathBuf)| *modified)
            .map(|(_, path)| path)
            .ok_or_else(|| anyhow!("no frames in {}", self.dir.display()))
    }
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"))
}

impl FrameSource for DirectoryFrames {
    fn capture(&self) -> Result<RgbImage> {
        let path = self.latest()?;
        let image = image::open(&path).with_context(|| format!("failed to decode {}", path.display()))?;
        Ok(image.to_rgb8())
    }

    fn is_valid(&self) -> bool {
        self.dir.is_dir()
    }
}

/// Input sink that only logs. Stands in until a platform injector is attached.
#[derive(Debug, Clone)]
pub struct LoggingActuator {
    title: String,
}

impl LoggingActuator {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into() }
    }
}

impl Actuator for LoggingActuator {
    fn click(&self, x: u32, y: u32) {
        tracing::info!("[{}] click ({x}, {y})", self.title);
    }

    fn click_host(&self, x: u32, y: u32) {
        tracing::info!("[{}] host click ({x}, {y})", self.title);
    }

    fn drag(&self, from: (u32, u32), to: (u32, u32), duration_ms: u64) {
        tracing::info!("[{}] drag {from:?} -> {to:?} over {duration_ms}ms", self.title);
    }

    fn scroll(&self, x: u32, y: u32, notches: i32) {
        tracing::info!("[{}] scroll {notches} at ({x}, {y})", self.title);
    }

    fn key_down(&self, vk: u16) {
        tracing::info!("[{}] key down {vk:#04x}", self.title);
    }

    fn key_up(&self, vk: u16) {
        tracing::info!("[{}] key up {vk:#04x}", self.title);
    }

    fn focus(&self) {
        tracing::debug!("[{}] focus", self.title);
    }
}

/// Build a target for one configured window.
pub fn bind(binding: &WindowBinding) -> WindowTarget {
    WindowTarget::new(
        binding.title.clone(),
        Arc::new(DirectoryFrames::new(&binding.frames)),
        Arc::new(LoggingActuator::new(&binding.title)),
    )
}

pub fn bind_all(bindings: &[WindowBinding]) -> Vec<WindowTarget> {
    let targets: Vec<WindowTarget> = bindings.iter().map(bind).collect();
    for target in &targets {
        if !target.is_valid() {
            tracing::warn!("window {} has no frame directory yet", target.title);
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    #[test]
    fn test_directory_frames_picks_newest_png() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("a.png");
        let newer = dir.path().join("b.png");
        RgbImage::new(4, 4).save(&older).unwrap();
        RgbImage::new(8, 2).save(&newer).unwrap();
        std::fs::write(dir.path().join("c.txt"), b"ignored").unwrap();

        let base = SystemTime::now() - Duration::from_secs(60);
        File::options().write(true).open(&older).unwrap().set_modified(base + Duration::from_secs(30)).unwrap();
        File::options().write(true).open(&newer).unwrap().set_modified(base).unwrap();

        let frames = DirectoryFrames::new(dir.path());
        assert!(frames.is_valid());
        assert_eq!(frames.capture().unwrap().dimensions(), (4, 4));
    }

    #[test]
    fn test_directory_frames_errors() {
        let dir = tempfile::tempdir().unwrap();
        let frames = DirectoryFrames::new(dir.path());
        assert!(frames.capture().is_err());

        let gone = DirectoryFrames::new(dir.path().join("missing"));
        assert!(!gone.is_valid());
        assert!(gone.capture().is_err());
    }

    #[test]
    fn test_bind_all_keeps_invalid_windows() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = vec![
            WindowBinding {
                title: "MuMu-0".to_string(),
                frames: dir.path().to_path_buf(),
            },
            WindowBinding {
                title: "MuMu-1".to_string(),
                frames: dir.path().join("missing"),
            },
        ];
        let targets = bind_all(&bindings);
        assert_eq!(targets.len(), 2);
        assert!(targets[0].is_valid());
        assert!(!targets[1].is_valid());
    }
}
