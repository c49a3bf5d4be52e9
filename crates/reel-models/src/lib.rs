//! Shared data models for the ReelGen worker.
//!
//! This crate defines the task record and its state machine, the video
//! specification payload (scenes, overlays, subtitle/transition configs),
//! the animation vocabulary, credit costs, provider tags, and encoding
//! profiles. It has no I/O; everything here is plain data consumed by the
//! worker, the providers, and the reconciler.

pub mod animation;
pub mod credit;
pub mod encoding;
pub mod provider;
pub mod spec;
pub mod task;

pub use animation::{AnimationModes, AnimationPreset, MotionMode, ZoomMode};
pub use credit::{scene_cost, task_cost, CreditEntry, AI_VIDEO_SCENE_COST, BASE_SCENE_COST};
pub use encoding::EncodingProfile;
pub use provider::{ImageProvider, VideoProvider};
pub use spec::{
    LogoConfig, LogoPosition, Scene, SceneKind, SubtitleConfig, SubtitlePosition, TextOverlay,
    TextPosition, TransitionConfig, TransitionKind, VideoSpec,
};
pub use task::{Task, TaskId, TaskResult, TaskState, TaskStateError};
