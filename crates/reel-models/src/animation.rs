//! Animation vocabulary for image scenes.
//!
//! The zoom/motion space is small and closed: two enums plus a preset map.
//! Random selection happens at render time, only when neither a preset nor
//! an explicit mode is provided.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::spec::Scene;

/// Zoom curve applied over the clip duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomMode {
    /// 1.00 -> 1.30
    ZoomIn,
    /// 1.20 -> 1.00
    ZoomOut,
    /// 1.10 +/- 0.05 sine
    Pulse,
}

impl ZoomMode {
    pub const ALL: [ZoomMode; 3] = [ZoomMode::ZoomIn, ZoomMode::ZoomOut, ZoomMode::Pulse];
}

impl FromStr for ZoomMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "zoom_in" => Ok(ZoomMode::ZoomIn),
            "zoom_out" => Ok(ZoomMode::ZoomOut),
            "pulse" => Ok(ZoomMode::Pulse),
            _ => Err(()),
        }
    }
}

/// Positional motion applied over the clip duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionMode {
    DriftUp,
    DriftDown,
    /// +/- osc_px sine
    Oscillate,
}

impl MotionMode {
    pub const ALL: [MotionMode; 3] = [
        MotionMode::DriftUp,
        MotionMode::DriftDown,
        MotionMode::Oscillate,
    ];
}

impl FromStr for MotionMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "drift_up" => Ok(MotionMode::DriftUp),
            "drift_down" => Ok(MotionMode::DriftDown),
            "oscillate" => Ok(MotionMode::Oscillate),
            _ => Err(()),
        }
    }
}

/// A resolved zoom/motion pair for one image scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnimationModes {
    pub zoom: Option<ZoomMode>,
    pub motion: Option<MotionMode>,
}

impl AnimationModes {
    pub fn is_empty(&self) -> bool {
        self.zoom.is_none() && self.motion.is_none()
    }

    /// Parse a list of mode names. Returns `None` when any name is invalid,
    /// which callers treat as "log and use random".
    pub fn parse(names: &[&str]) -> Option<Self> {
        let mut modes = AnimationModes::default();
        for name in names {
            if let Ok(zoom) = ZoomMode::from_str(name) {
                modes.zoom = Some(zoom);
            } else if let Ok(motion) = MotionMode::from_str(name) {
                modes.motion = Some(motion);
            } else {
                return None;
            }
        }
        Some(modes)
    }

    /// Resolve the animation request of a scene: preset first, then explicit
    /// modes. Returns `None` when nothing (or something invalid) was
    /// requested — the renderer then picks a random animation.
    pub fn from_scene(scene: &Scene) -> Option<Self> {
        if let Some(preset) = scene.animation_preset.as_deref() {
            if let Some(preset) = AnimationPreset::by_name(preset) {
                return Some(preset.modes());
            }
            return None;
        }
        if let Some(mode) = &scene.animation_mode {
            return Self::parse(&mode.names()).filter(|m| !m.is_empty());
        }
        None
    }
}

/// Named animation presets mapping to fixed mode pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationPreset {
    Subtle,
    Dynamic,
    Smooth,
    GentleDrift,
    Energetic,
    ZoomOnly,
    MotionOnly,
}

impl AnimationPreset {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "subtle" => Some(Self::Subtle),
            "dynamic" => Some(Self::Dynamic),
            "smooth" => Some(Self::Smooth),
            "gentle_drift" => Some(Self::GentleDrift),
            "energetic" => Some(Self::Energetic),
            "zoom_only" => Some(Self::ZoomOnly),
            "motion_only" => Some(Self::MotionOnly),
            _ => None,
        }
    }

    pub fn modes(&self) -> AnimationModes {
        let (zoom, motion) = match self {
            Self::Subtle => (Some(ZoomMode::ZoomIn), Some(MotionMode::DriftUp)),
            Self::Dynamic => (Some(ZoomMode::ZoomOut), Some(MotionMode::Oscillate)),
            Self::Smooth => (Some(ZoomMode::Pulse), None),
            Self::GentleDrift => (None, Some(MotionMode::DriftDown)),
            Self::Energetic => (Some(ZoomMode::Pulse), Some(MotionMode::Oscillate)),
            Self::ZoomOnly => (Some(ZoomMode::ZoomIn), None),
            Self::MotionOnly => (None, Some(MotionMode::Oscillate)),
        };
        AnimationModes { zoom, motion }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_pair() {
        let m = AnimationModes::parse(&["zoom_in"]).unwrap();
        assert_eq!(m.zoom, Some(ZoomMode::ZoomIn));
        assert_eq!(m.motion, None);

        let m = AnimationModes::parse(&["zoom_out", "oscillate"]).unwrap();
        assert_eq!(m.zoom, Some(ZoomMode::ZoomOut));
        assert_eq!(m.motion, Some(MotionMode::Oscillate));
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        assert!(AnimationModes::parse(&["zoom_in", "wobble"]).is_none());
    }

    #[test]
    fn test_presets() {
        let m = AnimationPreset::by_name("subtle").unwrap().modes();
        assert_eq!(m.zoom, Some(ZoomMode::ZoomIn));
        assert_eq!(m.motion, Some(MotionMode::DriftUp));

        assert!(AnimationPreset::by_name("does_not_exist").is_none());
    }

    #[test]
    fn test_from_scene_prefers_preset() {
        let scene: Scene = serde_json::from_value(serde_json::json!({
            "type": "image",
            "image_url": "https://e.com/x.png",
            "duration": 5,
            "animation_preset": "energetic",
            "animation_mode": "zoom_in"
        }))
        .unwrap();
        let m = AnimationModes::from_scene(&scene).unwrap();
        assert_eq!(m.zoom, Some(ZoomMode::Pulse));
        assert_eq!(m.motion, Some(MotionMode::Oscillate));
    }

    #[test]
    fn test_from_scene_none_means_random() {
        let scene: Scene = serde_json::from_value(serde_json::json!({
            "type": "image",
            "image_url": "https://e.com/x.png",
            "duration": 5
        }))
        .unwrap();
        assert!(AnimationModes::from_scene(&scene).is_none());
    }
}
