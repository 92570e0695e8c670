use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Result, bail};
use image::RgbImage;

use crate::detector::{self, Fingerprint, Region};
use crate::roster::RosterTemplate;

pub const POSITION_DIR: &str = "position_templates";
pub const READY_DIR: &str = "position_ready";
pub const ROSTER_DIR: &str = "roster";

/// A screen recognized by the fingerprint of a patch at a fixed anchor.
#[derive(Debug, Clone)]
pub struct PositionTemplate {
    pub key: String,
    pub x: u32,
    pub y: u32,
    pub label: String,
    pub fingerprint: Fingerprint,
}

impl PositionTemplate {
    pub fn region(&self) -> Region {
        Region::patch(self.x, self.y)
    }
}

/// A ready-indicator or popup notice. Looked up by fingerprint only.
#[derive(Debug, Clone)]
pub struct NoticeTemplate {
    pub key: String,
    pub label: String,
    pub fingerprint: Fingerprint,
}

/// One complete, immutable template set.
#[derive(Debug, Clone, Default)]
pub struct Templates {
    positions: BTreeMap<String, PositionTemplate>,
    notices: BTreeMap<String, NoticeTemplate>,
    roster: HashMap<String, RosterTemplate>,
}

/// Split a `(x,y)Label` key into its anchor and label.
///
/// Keys without a well-formed coordinate prefix come back whole with no anchor.
pub fn parse_key(key: &str) -> (Option<(u32, u32)>, &str) {
    let parsed = key.strip_prefix('(').and_then(|rest| {
        let (coords, label) = rest.split_once(')')?;
        let (x, y) = coords.split_once(',')?;
        Some(((x.trim().parse().ok()?, y.trim().parse().ok()?), label))
    });

    match parsed {
        Some((anchor, label)) => (Some(anchor), label),
        None => (None, key),
    }
}

impl Templates {
    /// Position templates in key order.
    pub fn positions(&self) -> impl Iterator<Item = &PositionTemplate> {
        self.positions.values()
    }

    pub fn notices(&self) -> impl Iterator<Item = &NoticeTemplate> {
        self.notices.values()
    }

    pub fn roster_entry(&self, name: &str) -> Option<&RosterTemplate> {
        self.roster.get(name)
    }

    pub fn roster_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.roster.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn notice_count(&self) -> usize {
        self.notices.len()
    }

    pub fn roster_count(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.notices.is_empty() && self.roster.is_empty()
    }

    /// Add a position template. Returns false when `key` has no `(x,y)` anchor.
    pub fn insert_position(&mut self, key: &str, fingerprint: Fingerprint) -> bool {
        let (Some((x, y)), label) = parse_key(key) else {
            return false;
        };
        self.positions.insert(
            key.to_string(),
            PositionTemplate {
                key: key.to_string(),
                x,
                y,
                label: label.to_string(),
                fingerprint,
            },
        );
        true
    }

    pub fn insert_notice(&mut self, key: &str, fingerprint: Fingerprint) {
        let (_, label) = parse_key(key);
        self.notices.insert(
            key.to_string(),
            NoticeTemplate {
                key: key.to_string(),
                label: label.to_string(),
                fingerprint,
            },
        );
    }

    pub fn insert_roster(&mut self, name: &str, template: RosterTemplate) {
        self.roster.insert(name.to_string(), template);
    }

    /// Load every collection from `sources`, override directory first.
    ///
    /// An override file shadows the bundled file with the same stem. Fails
    /// only when nothing at all could be loaded.
    pub fn load(sources: &TemplateSources) -> Result<Self> {
        let mut templates = Templates::default();

        for (key, image) in collect_images(sources, POSITION_DIR) {
            let Some(fingerprint) = detector::fingerprint(&image, None) else {
                tracing::warn!("position template {key} is empty, skipping");
                continue;
            };
            if !templates.insert_position(&key, fingerprint) {
                tracing::warn!("position template {key} has no (x,y) anchor, skipping");
            }
        }

        for (key, image) in collect_images(sources, READY_DIR) {
            match detector::fingerprint(&image, None) {
                Some(fingerprint) => templates.insert_notice(&key, fingerprint),
                None => tracing::warn!("ready template {key} is empty, skipping"),
            }
        }

        for (name, image) in collect_images(sources, ROSTER_DIR) {
            templates.insert_roster(&name, RosterTemplate::from_image(&image));
        }

        if templates.is_empty() {
            bail!("no templates found (searched {})", sources.describe());
        }

        tracing::info!(
            "loaded {} position, {} ready and {} roster templates",
            templates.position_count(),
            templates.notice_count(),
            templates.roster_count()
        );
        Ok(templates)
    }
}

/// Where template images come from.
#[derive(Debug, Clone, Default)]
pub struct TemplateSources {
    pub override_dir: Option<PathBuf>,
    pub bundled_dir: Option<PathBuf>,
}

impl TemplateSources {
    /// Resolve the bundled directory: explicit path, then `./assets`, then
    /// `<exe>/../share/arona/assets`.
    pub fn resolve(assets_dir: Option<PathBuf>, override_dir: Option<PathBuf>) -> Self {
        let mut candidates = Vec::new();
        if let Some(dir) = assets_dir {
            candidates.push(dir);
        }
        candidates.push(PathBuf::from("assets"));
        if let Ok(exe) = std::env::current_exe()
            && let Some(bin_dir) = exe.parent()
        {
            candidates.push(bin_dir.join("../share/arona/assets"));
        }

        let bundled_dir = candidates.into_iter().find(|dir| dir.is_dir());
        match &bundled_dir {
            Some(dir) => tracing::info!("bundled templates: {}", dir.display()),
            None => tracing::warn!("no bundled template directory found"),
        }

        Self {
            override_dir,
            bundled_dir,
        }
    }

    fn roots(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        [
            ("override", self.override_dir.as_deref()),
            ("bundled", self.bundled_dir.as_deref()),
        ]
        .into_iter()
        .filter_map(|(origin, dir)| dir.map(|d| (origin, d)))
    }

    fn describe(&self) -> String {
        let dirs: Vec<String> = self.roots().map(|(_, d)| d.display().to_string()).collect();
        if dirs.is_empty() {
            "no directories".to_string()
        } else {
            dirs.join(", ")
        }
    }
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"))
}

/// Decode every PNG of `subdir` across the sources, keyed by file stem.
/// A stem already taken by an earlier source is skipped.
fn collect_images(sources: &TemplateSources, subdir: &str) -> Vec<(String, RgbImage)> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    for (origin, root) in sources.roots() {
        let dir = root.join(subdir);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("{origin} {subdir} unavailable ({}): {e}", dir.display());
                continue;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_png(path))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if seen.contains(stem) {
                tracing::debug!("{origin} {subdir}/{stem} shadowed by override");
                continue;
            }

            match image::open(&path) {
                Ok(img) => {
                    seen.insert(stem.to_string());
                    images.push((stem.to_string(), img.to_rgb8()));
                    loaded += 1;
                }
                Err(e) => tracing::warn!("failed to load {}: {e}", path.display()),
            }
        }

        if loaded > 0 {
            tracing::info!("{subdir}: {loaded} from {origin} ({})", dir.display());
        }
    }

    images
}

/// Shared handle to the live template set.
///
/// Runs take a [`snapshot`](Self::snapshot) when they start; a reload swaps
/// the whole set and never mutates one a run is reading.
#[derive(Debug)]
pub struct TemplateLibrary {
    sources: TemplateSources,
    current: RwLock<Arc<Templates>>,
}

impl TemplateLibrary {
    pub fn load(sources: TemplateSources) -> Result<Self> {
        let templates = Templates::load(&sources)?;
        Ok(Self::with_templates(sources, templates))
    }

    pub fn with_templates(sources: TemplateSources, templates: Templates) -> Self {
        Self {
            sources,
            current: RwLock::new(Arc::new(templates)),
        }
    }

    pub fn snapshot(&self) -> Arc<Templates> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Load a fresh set from disk and publish it. On failure the previous
    /// set stays in place.
    pub fn reload(&self) -> Result<Arc<Templates>> {
        let fresh = Arc::new(Templates::load(&self.sources)?);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&fresh),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&fresh),
        }
        tracing::info!("template set reloaded");
        Ok(fresh)
    }
}
