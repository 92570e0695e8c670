use std::time::Duration;

use crate::detector::Region;
use crate::navigator::{Navigator, OPERATION, SWEEP_CONFIRM, Step, TASK, Waypoint};
use crate::run_state::Cancelled;
use crate::settings::{SweepPlan, SweepStage};

pub const TASK_END_ROI: Region = Region::patch(1840, 520);
pub const HARD_TASK_ROI: Region = Region::patch(1595, 215);

const OPERATION_MENU: Waypoint = Waypoint::new(OPERATION, 10, 2000, (1880, 890));
const TASK_MENU: Waypoint = Waypoint::new(TASK, 10, 2000, (1230, 370));
const CONFIRM_RETRIES: u32 = 5;
const CONFIRM_POLL_MS: u64 = 400;
const CONFIRM_PROBE: (u32, u32) = (1240, 500);

const NEXT_CHAPTER: (u32, u32) = (1840, 520);
const PREVIOUS_CHAPTER: (u32, u32) = (70, 540);
const HARD_TAB: (u32, u32) = (1595, 215);
const STAGE_ROW_X: u32 = 1680;
const STAGE_ROW_TOP: u32 = 370;
const STAGE_ROW_PITCH: u32 = 170;
const MAX_COUNT: (u32, u32) = (1525, 500);
const START_SWEEP: (u32, u32) = (1400, 630);
const CONFIRM_SWEEP: (u32, u32) = (1140, 750);
const SCROLL_ATTEMPTS: u32 = 30;

impl Navigator<'_> {
    /// Sweep every stage of `plan`, starting from the hall.
    pub async fn sweep_task(&self, plan: &SweepPlan) -> Step {
        self.reach(OPERATION_MENU).await?;
        self.pause(1500).await?;
        self.reach(TASK_MENU).await?;
        self.pause(1500).await?;

        self.scroll_to_last_chapter().await?;
        if self.ready(HARD_TASK_ROI).await {
            self.pause(300).await?;
            self.click(HARD_TAB);
        }

        if plan.stages.is_empty() {
            tracing::error!("[{}] no sweep stages configured", self.title());
            return Ok(());
        }

        tracing::info!("[{}] sweeping {} stage(s)", self.title(), plan.stages.len());
        for (i, stage) in plan.stages.iter().enumerate() {
            tracing::info!(
                "[{}] stage {}: chapter -{}, row {}",
                self.title(),
                i + 1,
                stage.task_index,
                stage.sub_task_index + 1
            );
            self.sweep_stage(stage).await?;
            self.pause(1000).await?;

            if i + 1 < plan.stages.len() {
                self.scroll_to_last_chapter().await?;
            }
        }

        tracing::info!("[{}] sweep done", self.title());
        Ok(())
    }

    /// Page forward until the newest chapter's end marker shows.
    async fn scroll_to_last_chapter(&self) -> Result<bool, Cancelled> {
        for _ in 0..SCROLL_ATTEMPTS {
            self.click(NEXT_CHAPTER);
            self.pause(500).await?;
            if self.ready(TASK_END_ROI).await {
                self.click(HARD_TAB);
                self.pause(300).await?;
                return Ok(true);
            }
        }
        tracing::warn!("[{}] last chapter not reached", self.title());
        Ok(false)
    }

    /// Returns false when the game refused the sweep (no stamina or attempts).
    async fn sweep_stage(&self, stage: &SweepStage) -> Result<bool, Cancelled> {
        for _ in 0..stage.task_index {
            self.click(PREVIOUS_CHAPTER);
            self.pause(300).await?;
        }

        let row_y = STAGE_ROW_TOP.saturating_add(stage.sub_task_index.saturating_mul(STAGE_ROW_PITCH));
        self.click((STAGE_ROW_X, row_y));
        self.pause(1000).await?;

        for _ in 0..3 {
            self.click(MAX_COUNT);
            self.pause(300).await?;
        }
        self.click(START_SWEEP);
        self.pause(1000).await?;

        let confirm_poll = Duration::from_millis(CONFIRM_POLL_MS);
        if !self
            .wait_for(SWEEP_CONFIRM, CONFIRM_RETRIES, confirm_poll, CONFIRM_PROBE)
            .await?
        {
            tracing::warn!("[{}] sweep refused, out of stamina or attempts", self.title());
            self.click(NEXT_CHAPTER);
            self.pause(400).await?;
            return Ok(false);
        }

        self.click(CONFIRM_SWEEP);
        Ok(true)
    }
}
