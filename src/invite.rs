use std::collections::HashSet;
use std::path::Path;

use crate::detector::{self, Region};
use crate::navigator::{Navigator, RoutineError, Step};
use crate::roster;
use crate::settings::TargetPlan;

pub const INVITATION_TICKET_ROI: Region = Region::patch(1310, 953);
pub const INVITATION_INTERFACE_ROI: Region = Region::patch(623, 125);
pub const INVITATION_NOTICE_ROI: Region = Region::patch(921, 223);

const TICKET_BUTTON: (u32, u32) = (1310, 953);
const ROW_X: u32 = 1150;
const CONFIRM: (u32, u32) = (1150, 775);
const DISMISS: (u32, u32) = (1317, 260);
const LIST_OPEN_POLLS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cafe {
    First,
    Second,
}

impl Cafe {
    pub fn number(self) -> u8 {
        match self {
            Cafe::First => 1,
            Cafe::Second => 2,
        }
    }
}

/// What the game says after a student row is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteNotice {
    /// Student would arrive in a different outfit.
    ChangeClothes,
    /// Student is in the other café and would change outfit.
    NextRoomAndOtherClothes,
    /// Student is already in the other café.
    NextRoom,
    /// Plain confirmation; inviting is safe.
    Confirm,
}

impl InviteNotice {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "ChangeClothes" => Some(Self::ChangeClothes),
            "NextRoomAndOtherClothes" => Some(Self::NextRoomAndOtherClothes),
            "NextRoom" => Some(Self::NextRoom),
            "Notice" => Some(Self::Confirm),
            _ => None,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::ChangeClothes => "would change clothes",
            Self::NextRoomAndOtherClothes => "is in the other cafe and would change clothes",
            Self::NextRoom => "is in the other cafe",
            Self::Confirm => "can be invited",
        }
    }
}

impl Navigator<'_> {
    /// Use the café's invitation ticket if it is ready and the window has an
    /// invite list. True when a student was invited.
    ///
    /// The caller is expected to be in `cafe` and to have checked that
    /// inviting there is enabled for this run.
    pub async fn invite_student_to_cafe(&self, cafe: Cafe, plan: &TargetPlan) -> Step<bool> {
        let n = cafe.number();
        if !self.ready(INVITATION_TICKET_ROI).await {
            tracing::warn!("[{}] cafe {n} invitation ticket not available", self.title());
            return Ok(false);
        }
        tracing::info!("[{}] cafe {n} invitation ticket ready", self.title());

        if plan.invite.is_empty() {
            tracing::warn!("[{}] no invite list configured", self.title());
            return Ok(false);
        }

        self.invite_student_by_name(&plan.invite, &plan.force).await
    }

    /// Open the invitation list and invite the first listed student the game
    /// accepts. Students in `force` are invited even if they would change
    /// clothes.
    pub async fn invite_student_by_name(&self, names: &[String], force: &HashSet<String>) -> Step<bool> {
        self.click(TICKET_BUTTON);

        let mut opened = false;
        for _ in 0..LIST_OPEN_POLLS {
            self.pause(100).await?;
            if self.ready(INVITATION_INTERFACE_ROI).await {
                opened = true;
                break;
            }
        }
        if !opened {
            return Err(RoutineError::Timeout("invitation list"));
        }

        // Rows are located once, on the list as it was first shown.
        let wanted = names.to_vec();
        let rows = match self
            .observe(move |list, templates| {
                wanted
                    .iter()
                    .map(|name| roster::find_entry(list, name, templates))
                    .collect::<Vec<_>>()
            })
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("[{}] failed to capture invitation list: {e:#}", self.title());
                return Ok(false);
            }
        };

        for (name, row) in names.iter().zip(rows) {
            if row == 0 {
                tracing::warn!("[{}] {name} not in the list, probably already in the cafe", self.title());
                continue;
            }

            self.click((ROW_X, row));
            self.pause(1500).await?;

            let diagnostics = self.diagnostics.map(Path::to_path_buf);
            let label = match self
                .observe(move |frame, templates| {
                    detector::identify_notice(frame, INVITATION_NOTICE_ROI, templates, diagnostics.as_deref())
                })
                .await
            {
                Ok(label) => label,
                Err(e) => {
                    tracing::warn!("[{}] failed to capture notice: {e:#}", self.title());
                    None
                }
            };

            let forced = force.contains(name);
            match label.as_deref().and_then(InviteNotice::from_label) {
                Some(InviteNotice::Confirm) => {
                    tracing::info!("[{}] inviting {name}", self.title());
                    return self.confirm_invite().await;
                }
                Some(notice @ (InviteNotice::ChangeClothes | InviteNotice::NextRoomAndOtherClothes))
                    if forced =>
                {
                    tracing::info!("[{}] {name} {}, inviting anyway", self.title(), notice.describe());
                    return self.confirm_invite().await;
                }
                Some(notice) => {
                    tracing::info!("[{}] {name} {}, skipping", self.title(), notice.describe());
                    self.click(DISMISS);
                }
                None => {
                    return Err(RoutineError::UnexpectedNotice {
                        name: name.clone(),
                        notice: label,
                    });
                }
            }

            self.pause(1000).await?;
        }

        Ok(false)
    }

    async fn confirm_invite(&self) -> Step<bool> {
        self.click(CONFIRM);
        self.pause(2500).await?;
        Ok(true)
    }
}
