use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use image::RgbImage;
use thiserror::Error;

use crate::detector::{self, Region};
use crate::run_state::{Cancelled, RunState};
use crate::settings::{RunConfig, TargetPlan};
use crate::templates::Templates;
use crate::window::{VK_CONTROL, WindowTarget};

pub const HALL: &str = "Hall";
pub const CAFE1: &str = "Cafe1";
pub const CAFE2: &str = "Cafe2";
pub const OPERATION: &str = "Operation";
pub const TASK: &str = "Task";
pub const SWEEP_CONFIRM: &str = "SweepConfirm";
pub const EDIT_MODE: &str = "EditMode";
pub const CLOSE_GAME: &str = "CloseGame";

#[derive(Debug, Error)]
pub enum RoutineError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("unexpected notice {notice:?} while inviting {name}")]
    UnexpectedNotice { name: String, notice: Option<String> },
}

pub type Step<T = ()> = Result<T, RoutineError>;

/// A screen to wait for and how hard to try.
#[derive(Debug, Clone, Copy)]
pub struct Waypoint {
    pub label: &'static str,
    pub retries: u32,
    pub poll: Duration,
    /// Harmless spot clicked between polls to dismiss popups.
    pub nudge: (u32, u32),
}

impl Waypoint {
    pub(crate) const fn new(label: &'static str, retries: u32, poll_ms: u64, nudge: (u32, u32)) -> Self {
        Self {
            label,
            retries,
            poll: Duration::from_millis(poll_ms),
            nudge,
        }
    }
}

const TOP_RIGHT_CORNER: (u32, u32) = (1855, 10);
const CAFE_EDGE: (u32, u32) = (150, 1045);

const ENTER_HALL: Waypoint = Waypoint::new(HALL, 20, 4000, (120, 640));
const HALL_AFTER_SWEEP: Waypoint = Waypoint::new(HALL, 30, 1000, TOP_RIGHT_CORNER);
const RETURN_HALL: Waypoint = Waypoint::new(HALL, 20, 1000, TOP_RIGHT_CORNER);
const ENTER_CAFE1: Waypoint = Waypoint::new(CAFE1, 20, 1500, CAFE_EDGE);
const ENTER_CAFE2: Waypoint = Waypoint::new(CAFE2, 20, 1500, CAFE_EDGE);
const EDIT_MODE_WAIT: Waypoint = Waypoint::new(EDIT_MODE, 10, 1000, CAFE_EDGE);
const CLOSE_DIALOG: Waypoint = Waypoint::new(CLOSE_GAME, 20, 1000, (585, 244));

const SETTLE: Duration = Duration::from_millis(500);

const HALL_CAFE_BUTTON: (u32, u32) = (118, 960);
const CAFE_SWITCH_BUTTON: (u32, u32) = (230, 134);
const EDIT_BUTTON: (u32, u32) = (90, 992);
const EDIT_EXIT_BUTTON: (u32, u32) = (1680, 140);
const REFRESH_ATTEMPTS: u32 = 30;

const CAFE_DRAGS: [((u32, u32), (u32, u32)); 3] = [
    ((1680, 240), (130, 1040)),
    ((400, 400), (1900, 900)),
    ((1080, 1040), (1680, 240)),
];
const DRAG_MS: u64 = 1000;
const ZOOM_NOTCHES: u32 = 12;

const PAT_AREA: ((u32, u32), (u32, u32)) = ((200, 240), (1900, 880));
const PAT_SPACING: usize = 50;
const PAT_CLICK_DELAY: Duration = Duration::from_millis(20);
pub const PAT_ROUNDS: u32 = 3;

const HOST_SETTINGS: (u32, u32) = (1531, 30);
const MUTE_TOGGLE: (u32, u32) = (715, 136);
const HOST_SETTINGS_CLOSE: (u32, u32) = (1120, 30);
pub const HOST_BACK: (u32, u32) = (1600, 30);
const CLOSE_CONFIRM: (u32, u32) = (1145, 756);

/// Drives one window through its routines.
///
/// Every wait goes through the shared [`RunState`], so a cancel request is
/// honoured within one check interval wherever the routine is.
pub struct Navigator<'a> {
    pub(crate) window: &'a WindowTarget,
    pub(crate) templates: &'a Arc<Templates>,
    pub(crate) run: &'a RunState,
    pub(crate) diagnostics: Option<&'a Path>,
}

impl<'a> Navigator<'a> {
    pub fn new(
        window: &'a WindowTarget,
        templates: &'a Arc<Templates>,
        run: &'a RunState,
        diagnostics: Option<&'a Path>,
    ) -> Self {
        Self {
            window,
            templates,
            run,
            diagnostics,
        }
    }

    pub(crate) fn title(&self) -> &str {
        &self.window.title
    }

    pub(crate) fn click(&self, (x, y): (u32, u32)) {
        self.window.input().click(x, y);
    }

    pub(crate) async fn pause(&self, ms: u64) -> Result<(), Cancelled> {
        self.run.sleep(Duration::from_millis(ms)).await
    }

    /// Capture a frame and run `inspect` on it in the blocking pool. Frame
    /// decoding and hashing must stay off the runtime threads.
    pub(crate) async fn observe<T, F>(&self, inspect: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RgbImage, &Templates) -> T + Send + 'static,
    {
        let window = self.window.clone();
        let templates = Arc::clone(self.templates);
        tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
            let frame = window.capture()?;
            Ok(inspect(&frame, &templates))
        })
        .await
        .context("frame inspection task failed")?
    }

    /// Capture once and test `roi` against the ready templates. A failed
    /// capture reads as not ready.
    pub(crate) async fn ready(&self, roi: Region) -> bool {
        match self.observe(move |frame, templates| detector::is_ready(frame, roi, templates)).await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!("[{}] capture failed: {e:#}", self.title());
                false
            }
        }
    }

    /// Poll until `target` is on screen, at most `max_retries` times.
    ///
    /// Between polls the `nudge` point is clicked; on success it is clicked
    /// once more and the screen given a moment to settle. The sweep
    /// confirmation dialog is only observed, never nudged.
    pub async fn wait_for(
        &self,
        target: &str,
        max_retries: u32,
        poll: Duration,
        nudge: (u32, u32),
    ) -> Result<bool, Cancelled> {
        let observe_only = target == SWEEP_CONFIRM;
        match target {
            SWEEP_CONFIRM => tracing::info!("[{}] checking remaining sweep attempts", self.title()),
            EDIT_MODE => {}
            _ => tracing::info!("[{}] waiting for {target}", self.title()),
        }

        for attempt in 1..=max_retries {
            self.run.checkpoint()?;

            let label = target.to_owned();
            let reached = match self
                .observe(move |frame, templates| detector::identify_position(frame, &label, templates).is_some())
                .await
            {
                Ok(reached) => reached,
                Err(e) => {
                    tracing::warn!("[{}] capture failed: {e:#}", self.title());
                    false
                }
            };

            if reached {
                tracing::debug!("[{}] reached {target} after {attempt} poll(s)", self.title());
                if !observe_only {
                    self.click(nudge);
                    self.run.sleep(SETTLE).await?;
                }
                return Ok(true);
            }

            if !observe_only {
                self.click(nudge);
            }
            self.run.sleep(poll).await?;
        }

        if !observe_only {
            tracing::error!("[{}] timed out waiting for {target}", self.title());
        }
        Ok(false)
    }

    pub(crate) async fn reach(&self, waypoint: Waypoint) -> Step {
        if self
            .wait_for(waypoint.label, waypoint.retries, waypoint.poll, waypoint.nudge)
            .await?
        {
            Ok(())
        } else {
            Err(RoutineError::Timeout(waypoint.label))
        }
    }

    /// Log a failed sub-routine and carry on. Cancellation still unwinds.
    pub(crate) fn recover<T>(&self, what: &str, result: Step<T>) -> Result<Option<T>, Cancelled> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(RoutineError::Cancelled(c)) => Err(c),
            Err(e) => {
                tracing::error!("[{}] {what} failed: {e}", self.title());
                Ok(None)
            }
        }
    }

    pub async fn enter_cafe1_from_hall(&self) -> Step {
        self.click(HALL_CAFE_BUTTON);
        self.reach(ENTER_CAFE1).await
    }

    pub async fn enter_cafe2_from_cafe1(&self) -> Step {
        self.click(CAFE_SWITCH_BUTTON);
        self.pause(3000).await?;
        self.reach(ENTER_CAFE2).await
    }

    pub async fn enter_cafe1_from_cafe2(&self) -> Step {
        self.click(CAFE_SWITCH_BUTTON);
        self.pause(1000).await?;
        self.reach(ENTER_CAFE1).await?;
        self.pause(1000).await?;
        Ok(())
    }

    /// Zoom the café out with Ctrl+wheel. Not part of the daily script; the
    /// pan drags assume the default zoom. Control is always released, even
    /// when the run is cancelled halfway.
    pub async fn adjust_cafe_view(&self, (x, y): (u32, u32)) -> Result<(), Cancelled> {
        let input = self.window.input();
        input.focus();
        input.key_down(VK_CONTROL);

        let zoomed = async {
            self.pause(500).await?;
            for _ in 0..ZOOM_NOTCHES {
                input.scroll(x, y, -3);
                self.pause(200).await?;
            }
            Ok::<(), Cancelled>(())
        }
        .await;

        input.key_up(VK_CONTROL);
        zoomed
    }

    /// Pan the zoomed-out café so the student area fills the pat grid.
    pub async fn adjust_cafe_position(&self) -> Result<(), Cancelled> {
        for (from, to) in CAFE_DRAGS {
            self.window.input().drag(from, to, DRAG_MS);
            self.pause(DRAG_MS).await?;
        }
        Ok(())
    }

    async fn click_grid(&self) -> Result<(), Cancelled> {
        let ((left, top), (right, bottom)) = PAT_AREA;
        let mut clicks = 0;
        for y in (top..=bottom).step_by(PAT_SPACING) {
            for x in (left..=right).step_by(PAT_SPACING) {
                self.click((x, y));
                clicks += 1;
                if let Err(c) = self.run.sleep(PAT_CLICK_DELAY).await {
                    tracing::warn!("[{}] patting interrupted after {clicks} clicks", self.title());
                    return Err(c);
                }
            }
        }
        tracing::debug!("[{}] pat grid done, {clicks} clicks", self.title());
        Ok(())
    }

    /// Sweep the pat grid `rounds` times, refreshing the café between rounds
    /// so students that moved are reachable again.
    pub async fn pat_students(&self, rounds: u32) -> Result<(), Cancelled> {
        for round in 0..rounds {
            tracing::info!("[{}] pat round {}/{rounds}", self.title(), round + 1);
            self.click_grid().await?;
            self.pause(1000).await?;

            if round + 1 < rounds {
                if !self.refresh_cafe().await? {
                    tracing::error!("[{}] could not refresh the cafe, stopping pats", self.title());
                    return Ok(());
                }
                self.pause(500).await?;
            }
        }
        Ok(())
    }

    /// Toggle edit mode on and off, which makes students re-seat.
    pub async fn refresh_cafe(&self) -> Result<bool, Cancelled> {
        let mut entered = false;
        for _ in 0..REFRESH_ATTEMPTS {
            if self
                .wait_for(EDIT_MODE, EDIT_MODE_WAIT.retries, EDIT_MODE_WAIT.poll, EDIT_MODE_WAIT.nudge)
                .await?
            {
                self.click(EDIT_BUTTON);
                entered = true;
                break;
            }
            self.click(CAFE_EDGE);
            self.pause(1000).await?;
        }
        if !entered {
            tracing::warn!("[{}] edit button never appeared", self.title());
            return Ok(false);
        }

        for _ in 0..REFRESH_ATTEMPTS {
            self.pause(1000).await?;
            self.click(EDIT_EXIT_BUTTON);
            if self
                .wait_for(EDIT_MODE, EDIT_MODE_WAIT.retries, EDIT_MODE_WAIT.poll, EDIT_MODE_WAIT.nudge)
                .await?
            {
                return Ok(true);
            }
        }

        tracing::warn!("[{}] could not leave edit mode", self.title());
        Ok(false)
    }

    /// Toggle game sound through the emulator's settings panel.
    pub async fn mute_sound(&self) -> Result<(), Cancelled> {
        tracing::info!("[{}] toggling sound", self.title());
        let input = self.window.input();
        input.click_host(HOST_SETTINGS.0, HOST_SETTINGS.1);
        self.pause(1000).await?;
        input.click(MUTE_TOGGLE.0, MUTE_TOGGLE.1);
        self.pause(1000).await?;
        input.click_host(HOST_SETTINGS_CLOSE.0, HOST_SETTINGS_CLOSE.1);
        self.pause(1000).await
    }

    /// Back out of the game through the emulator's back button and confirm
    /// the quit dialog.
    pub async fn close_by_return(&self) -> Step {
        tracing::info!("[{}] closing game", self.title());
        self.window.input().click_host(HOST_BACK.0, HOST_BACK.1);
        self.pause(1000).await?;
        self.reach(CLOSE_DIALOG).await?;
        self.click(CLOSE_CONFIRM);
        self.pause(1000).await?;
        Ok(())
    }

    /// The full daily routine for one window, starting from anywhere that
    /// leads back to the hall and ending in the hall.
    pub async fn execute_script(&self, config: &RunConfig, plan: &TargetPlan) -> Step {
        self.run.checkpoint()?;
        self.reach(ENTER_HALL).await?;

        if config.sweep {
            match plan.sweep.as_ref().filter(|s| !s.stages.is_empty()) {
                Some(sweep) => {
                    tracing::info!("[{}] starting sweep", self.title());
                    self.recover("sweep", self.sweep_task(sweep).await)?;
                    self.pause(1000).await?;
                    self.reach(HALL_AFTER_SWEEP).await?;
                }
                None => tracing::warn!("[{}] sweep enabled but no stages configured, skipping", self.title()),
            }
        }

        tracing::info!("[{}] heading to cafe 1", self.title());
        self.enter_cafe1_from_hall().await?;
        self.adjust_cafe_position().await?;
        self.pat_students(PAT_ROUNDS).await?;
        self.pause(500).await?;

        tracing::info!("[{}] heading to cafe 2", self.title());
        self.enter_cafe2_from_cafe1().await?;
        self.adjust_cafe_position().await?;
        self.pat_students(PAT_ROUNDS).await?;
        self.pause(500).await?;

        if config.invite_cafe2 {
            self.invite_and_pat(crate::invite::Cafe::Second, plan).await?;
        }

        if config.invite_cafe1 {
            self.enter_cafe1_from_cafe2().await?;
            self.invite_and_pat(crate::invite::Cafe::First, plan).await?;
        }

        self.reach(RETURN_HALL).await?;
        self.pause(500).await?;
        tracing::info!("[{}] routine complete", self.title());
        Ok(())
    }

    async fn invite_and_pat(&self, cafe: crate::invite::Cafe, plan: &TargetPlan) -> Result<(), Cancelled> {
        let what = format!("invite in cafe {}", cafe.number());
        match self.recover(&what, self.invite_student_to_cafe(cafe, plan).await)? {
            Some(true) => {
                tracing::info!("[{}] {what} succeeded, patting again", self.title());
                self.pause(1000).await?;
                self.pat_students(PAT_ROUNDS).await?;
            }
            Some(false) => tracing::error!("[{}] {what} did not go through", self.title()),
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Action, ScriptedWindow, blank_frame, stamp};
    use crate::window::FrameSource;
    use tokio::time::Instant;

    fn hall_templates(label: &str) -> (Arc<Templates>, image::RgbImage) {
        let (frame, fp) = stamp(blank_frame(), 0, 300, 400);
        let mut templates = Templates::default();
        templates.insert_position(&format!("(300,400){label}"), fp);
        (Arc::new(templates), frame)
    }

    fn running() -> RunState {
        let run = RunState::new();
        run.try_begin();
        run
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_exhausts_retries() {
        let (templates, _) = hall_templates(HALL);
        let window = ScriptedWindow::new(vec![blank_frame()]);
        let target = window.target("w");
        let run = running();
        let nav = Navigator::new(&target, &templates, &run, None);

        let found = nav.wait_for(HALL, 5, Duration::from_secs(1), (7, 8)).await;
        assert_eq!(found, Ok(false));
        assert_eq!(window.captures(), 5);
        assert_eq!(window.clicks(), vec![(7, 8); 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_finds_regional_variant() {
        let (templates, hall) = hall_templates("Hall_JP");
        let window = ScriptedWindow::new(vec![blank_frame(), blank_frame(), hall]);
        let target = window.target("w");
        let run = running();
        let nav = Navigator::new(&target, &templates, &run, None);

        assert_eq!(nav.wait_for(HALL, 5, Duration::from_secs(1), (7, 8)).await, Ok(true));
        assert_eq!(window.captures(), 3);
        // Two misses plus the post-match nudge.
        assert_eq!(window.clicks().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_confirm_is_never_nudged() {
        let (templates, _) = hall_templates(SWEEP_CONFIRM);
        let window = ScriptedWindow::new(vec![blank_frame()]);
        let target = window.target("w");
        let run = running();
        let nav = Navigator::new(&target, &templates, &run, None);

        assert_eq!(nav.wait_for(SWEEP_CONFIRM, 3, Duration::from_millis(400), (1, 1)).await, Ok(false));
        assert!(window.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cancels_mid_poll() {
        let (templates, _) = hall_templates(HALL);
        let window = ScriptedWindow::new(vec![blank_frame()]);
        let target = window.target("w");
        let run = Arc::new(running());

        let canceller = Arc::clone(&run);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            canceller.request_cancel();
        });

        let nav = Navigator::new(&target, &templates, &run, None);
        let start = Instant::now();
        let result = nav.wait_for(HALL, 10, Duration::from_secs(60), (1, 1)).await;
        assert_eq!(result, Err(Cancelled));
        assert!(start.elapsed() <= Duration::from_millis(250));
        assert_eq!(window.captures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reach_turns_miss_into_timeout() {
        let (templates, _) = hall_templates(HALL);
        let window = ScriptedWindow::new(vec![blank_frame()]);
        let target = window.target("w");
        let run = running();
        let nav = Navigator::new(&target, &templates, &run, None);

        let result = nav.reach(RETURN_HALL).await;
        assert!(matches!(result, Err(RoutineError::Timeout(HALL))));
        assert_eq!(window.captures(), RETURN_HALL.retries as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cafe_view_releases_control_on_cancel() {
        let templates = Arc::new(Templates::default());
        let window = ScriptedWindow::new(vec![blank_frame()]);
        let target = window.target("w");
        let run = Arc::new(running());

        let canceller = Arc::clone(&run);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(850)).await;
            canceller.request_cancel();
        });

        let nav = Navigator::new(&target, &templates, &run, None);
        assert_eq!(nav.adjust_cafe_view((960, 540)).await, Err(Cancelled));

        let actions = window.actions();
        assert_eq!(actions.first(), Some(&Action::KeyDown(VK_CONTROL)));
        assert_eq!(actions.last(), Some(&Action::KeyUp(VK_CONTROL)));
        assert!(actions.iter().filter(|a| matches!(a, Action::Scroll(..))).count() < ZOOM_NOTCHES as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_cafe_toggles_edit_mode() {
        let (frame, fp) = stamp(blank_frame(), 1, 90, 992);
        let mut templates = Templates::default();
        templates.insert_position("(90,992)EditMode", fp);
        let templates = Arc::new(templates);
        let window = ScriptedWindow::new(vec![frame]);
        let target = window.target("w");
        let run = running();
        let nav = Navigator::new(&target, &templates, &run, None);

        assert_eq!(nav.refresh_cafe().await, Ok(true));
        let clicks = window.clicks();
        assert!(clicks.contains(&EDIT_BUTTON));
        assert!(clicks.contains(&EDIT_EXIT_BUTTON));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_uses_host_chrome() {
        let templates = Arc::new(Templates::default());
        let window = ScriptedWindow::new(vec![blank_frame()]);
        let target = window.target("w");
        let run = running();
        let nav = Navigator::new(&target, &templates, &run, None);

        nav.mute_sound().await.unwrap();
        assert_eq!(
            window.actions(),
            vec![
                Action::HostClick(1531, 30),
                Action::Click(715, 136),
                Action::HostClick(1120, 30),
            ]
        );
    }

    /// Frames that remember which thread captured them.
    #[derive(Default)]
    struct ThreadTaggedFrames {
        threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl FrameSource for ThreadTaggedFrames {
        fn capture(&self) -> anyhow::Result<image::RgbImage> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok(blank_frame())
        }

        fn is_valid(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_inspected_off_the_runtime_thread() {
        let (templates, _) = hall_templates(HALL);
        let frames = Arc::new(ThreadTaggedFrames::default());
        let target = WindowTarget::new("w", frames.clone(), ScriptedWindow::new(vec![]));
        let run = running();
        let nav = Navigator::new(&target, &templates, &run, None);

        assert_eq!(nav.wait_for(HALL, 2, Duration::from_millis(100), (1, 1)).await, Ok(false));
        assert!(!nav.ready(Region::patch(300, 400)).await);

        let threads = frames.threads.lock().unwrap();
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|&id| id != std::thread::current().id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_capture_counts_as_a_miss() {
        let (templates, _) = hall_templates(HALL);
        let window = ScriptedWindow::new(vec![]);
        let target = window.target("w");
        let run = running();
        let nav = Navigator::new(&target, &templates, &run, None);

        assert_eq!(nav.wait_for(HALL, 3, Duration::from_secs(1), (7, 8)).await, Ok(false));
        assert_eq!(window.captures(), 3);
        assert_eq!(window.clicks(), vec![(7, 8); 3]);
        assert!(!nav.ready(Region::patch(300, 400)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cafe_switch_clicks_before_settling() {
        let (templates, _) = hall_templates(CAFE1);
        let window = ScriptedWindow::new(vec![blank_frame()]);
        let target = window.target("w");
        let run = Arc::new(running());

        let canceller = Arc::clone(&run);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.request_cancel();
        });

        let nav = Navigator::new(&target, &templates, &run, None);
        let result = nav.enter_cafe1_from_cafe2().await;
        assert!(matches!(result, Err(RoutineError::Cancelled(_))));
        assert_eq!(window.clicks(), vec![CAFE_SWITCH_BUTTON]);
        assert_eq!(window.captures(), 0);
    }
}
