//! Synthetic frames and a scripted window for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use image::{Rgb, RgbImage, imageops};

use crate::detector::{POSITION_PATCH, fingerprint};
use crate::roster::{
    AVATAR_HEIGHT, AVATAR_OFFSET_Y, AVATAR_WIDTH, AVATAR_X, MARKER_COLOR, MARKER_LENGTH, MARKER_X,
    ROSTER_BACKGROUND,
};
use crate::window::{Actuator, FrameSource, WindowTarget};

pub const FRAME_WIDTH: u32 = 1920;
pub const FRAME_HEIGHT: u32 = 1080;

const DARK: Rgb<u8> = Rgb([20, 20, 20]);
const LIGHT: Rgb<u8> = Rgb([230, 230, 230]);

pub fn blank_frame() -> RgbImage {
    RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgb([128, 128, 128]))
}

/// A 36×36 two-tone pattern. Different kinds hash differently.
pub fn patch(kind: usize) -> RgbImage {
    let side = POSITION_PATCH;
    RgbImage::from_fn(side, side, |x, y| {
        let dark = match kind % 5 {
            0 => x < side / 2,
            1 => y < side / 2,
            2 => x > y,
            3 => (x / 9 + y / 9) % 2 == 0,
            _ => x + y < side,
        };
        if dark { DARK } else { LIGHT }
    })
}

pub fn paint(mut frame: RgbImage, image: &RgbImage, x: u32, y: u32) -> RgbImage {
    imageops::replace(&mut frame, image, i64::from(x), i64::from(y));
    frame
}

/// Paint `patch(kind)` at `(x, y)` and return its fingerprint alongside.
pub fn stamp(frame: RgbImage, kind: usize, x: u32, y: u32) -> (RgbImage, crate::detector::Fingerprint) {
    let p = patch(kind);
    let fp = fingerprint(&p, None).expect("patch is non-empty");
    (paint(frame, &p, x, y), fp)
}

pub fn roster_frame() -> RgbImage {
    RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, ROSTER_BACKGROUND)
}

/// A 168×36 avatar strip with one dark third chosen by `kind`.
pub fn avatar(kind: usize) -> RgbImage {
    let band = AVATAR_WIDTH / 3;
    let start = (kind as u32 % 3) * band;
    RgbImage::from_fn(AVATAR_WIDTH, AVATAR_HEIGHT, |x, _| {
        if (start..start + band).contains(&x) { DARK } else { ROSTER_BACKGROUND }
    })
}

/// Draw a list row whose marker starts at `marker_y`.
pub fn paint_roster_row(mut frame: RgbImage, marker_y: u32, face: &RgbImage) -> RgbImage {
    assert_eq!(face.dimensions(), (AVATAR_WIDTH, AVATAR_HEIGHT));
    for dy in 0..MARKER_LENGTH {
        frame.put_pixel(MARKER_X, marker_y + dy, MARKER_COLOR);
    }
    paint(frame, face, AVATAR_X, marker_y - AVATAR_OFFSET_Y)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Click(u32, u32),
    HostClick(u32, u32),
    Drag((u32, u32), (u32, u32)),
    Scroll(u32, u32, i32),
    KeyDown(u16),
    KeyUp(u16),
}

/// Plays back a fixed list of frames and records every input.
///
/// Capture `n` returns frame `n`; once the list runs out the last frame
/// repeats.
pub struct ScriptedWindow {
    frames: Vec<RgbImage>,
    captures: AtomicUsize,
    actions: Mutex<Vec<Action>>,
    valid: AtomicBool,
}

impl ScriptedWindow {
    pub fn new(frames: Vec<RgbImage>) -> Arc<Self> {
        Arc::new(Self {
            frames,
            captures: AtomicUsize::new(0),
            actions: Mutex::new(Vec::new()),
            valid: AtomicBool::new(true),
        })
    }

    pub fn invalid() -> Arc<Self> {
        let window = Self::new(vec![blank_frame()]);
        window.valid.store(false, Ordering::SeqCst);
        window
    }

    pub fn target(self: &Arc<Self>, title: &str) -> WindowTarget {
        WindowTarget::new(title, self.clone(), self.clone())
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> Vec<(u32, u32)> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Click(x, y) => Some((x, y)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }
}

impl FrameSource for ScriptedWindow {
    fn capture(&self) -> Result<RgbImage> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        self.frames
            .get(n)
            .or(self.frames.last())
            .cloned()
            .ok_or_else(|| anyhow!("no frames scripted"))
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}

impl Actuator for ScriptedWindow {
    fn click(&self, x: u32, y: u32) {
        self.record(Action::Click(x, y));
    }

    fn click_host(&self, x: u32, y: u32) {
        self.record(Action::HostClick(x, y));
    }

    fn drag(&self, from: (u32, u32), to: (u32, u32), _duration_ms: u64) {
        self.record(Action::Drag(from, to));
    }

    fn scroll(&self, x: u32, y: u32, notches: i32) {
        self.record(Action::Scroll(x, y, notches));
    }

    fn key_down(&self, vk: u16) {
        self.record(Action::KeyDown(vk));
    }

    fn key_up(&self, vk: u16) {
        self.record(Action::KeyUp(vk));
    }
}
