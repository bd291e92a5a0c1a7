//! Per-pair image lookup and encoding.
//!
//! Panorama views live at `<googledata>/place<place>/id_<pano>_<heading>.jpg`.
//! Bob faces the opposite way along the route, so his views are taken with
//! mirrored headings.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::domain::{EvalError, Result, WaypointPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Heading {
    Front,
    Right,
    Back,
    Left,
}

impl Heading {
    /// Clockwise presentation order.
    pub const ORDER: [Heading; 4] = [Heading::Front, Heading::Right, Heading::Back, Heading::Left];

    pub fn label(&self) -> &'static str {
        match self {
            Heading::Front => "front",
            Heading::Right => "right",
            Heading::Back => "back",
            Heading::Left => "left",
        }
    }

    pub fn mirrored(self) -> Heading {
        match self {
            Heading::Front => Heading::Back,
            Heading::Right => Heading::Left,
            Heading::Back => Heading::Front,
            Heading::Left => Heading::Right,
        }
    }
}

impl fmt::Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One camera view as presented to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentView {
    /// Heading from the agent's own perspective.
    pub heading: Heading,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairImages {
    pub alice: Vec<AgentView>,
    pub bob: Vec<AgentView>,
}

/// Maps a waypoint pair to the image files for both agents.
pub trait ImageResolver: Send + Sync {
    fn resolve(&self, pair: &WaypointPair) -> Result<PairImages>;
}

/// Resolver over the on-disk `googledata` layout.
#[derive(Debug, Clone)]
pub struct FsImageResolver {
    root: PathBuf,
}

impl FsImageResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn views(&self, place_dir: &Path, pano: &str, mirror: bool) -> Vec<AgentView> {
        Heading::ORDER
            .iter()
            .filter_map(|&heading| {
                let file_heading = if mirror { heading.mirrored() } else { heading };
                let path = place_dir.join(format!("id_{pano}_{file_heading}.jpg"));
                path.is_file().then_some(AgentView { heading, path })
            })
            .collect()
    }
}

impl ImageResolver for FsImageResolver {
    fn resolve(&self, pair: &WaypointPair) -> Result<PairImages> {
        let place_dir = self.root.join(format!("place{}", pair.place));
        let alice = self.views(&place_dir, &pair.alice_pano, false);
        let bob = self.views(&place_dir, &pair.bob_pano, true);

        if alice.is_empty() || bob.is_empty() {
            return Err(EvalError::Image(format!(
                "no images for trajectory {} pair {} under {}",
                pair.trajectory,
                pair.index,
                place_dir.display()
            )));
        }
        Ok(PairImages { alice, bob })
    }
}

/// Read an image file and return it base64-encoded.
pub async fn encode_image(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| EvalError::Image(format!("{}: {e}", path.display())))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
