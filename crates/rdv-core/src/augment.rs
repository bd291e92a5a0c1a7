//! Random view rotation used to probe orientation robustness.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::domain::{AugmentationInfo, Rotation};

/// Draws per-agent rotations. Shared across concurrent graders.
#[derive(Debug)]
pub struct Augmenter {
    rng: Mutex<StdRng>,
}

impl Augmenter {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible draws for tests and repeatable runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn draw(&self) -> AugmentationInfo {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut pick = || *Rotation::ALL.choose(&mut *rng).unwrap_or(&Rotation::None);
        AugmentationInfo {
            alice_rotation: pick(),
            bob_rotation: pick(),
        }
    }
}

/// Rotate a heading-ordered view list right by the rotation's step count.
pub fn rotate_views<T>(views: &mut [T], rotation: Rotation) {
    if views.is_empty() {
        return;
    }
    let steps = rotation.steps() as usize % views.len();
    views.rotate_right(steps);
}

/// Prompt addendum describing the applied rotations.
pub fn rotation_note(info: &AugmentationInfo) -> String {
    format!(
        "Note: The images are rotated {} degrees for Alice and {} degrees for Bob.",
        info.alice_rotation.degrees(),
        info.bob_rotation.degrees()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_draws_repeat() {
        let a = Augmenter::seeded(42);
        let b = Augmenter::seeded(42);
        for _ in 0..16 {
            assert_eq!(a.draw(), b.draw());
        }
    }

    #[test]
    fn test_rotate_views_moves_tail_to_front() {
        let mut v = vec!["front", "right", "back", "left"];
        rotate_views(&mut v, Rotation::Quarter);
        assert_eq!(v, vec!["left", "front", "right", "back"]);

        let mut v = vec!["front", "right", "back", "left"];
        rotate_views(&mut v, Rotation::ThreeQuarter);
        assert_eq!(v, vec!["right", "back", "left", "front"]);
    }

    #[test]
    fn test_rotate_views_handles_short_lists() {
        let mut v = vec![1, 2];
        rotate_views(&mut v, Rotation::ThreeQuarter);
        assert_eq!(v, vec![2, 1]);

        let mut empty: Vec<u8> = vec![];
        rotate_views(&mut empty, Rotation::Half);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_rotation_note_mentions_degrees() {
        let note = rotation_note(&AugmentationInfo {
            alice_rotation: Rotation::Half,
            bob_rotation: Rotation::None,
        });
        assert!(note.contains("180 degrees for Alice"));
        assert!(note.contains("0 degrees for Bob"));
    }
}
