//! Provider clients for the ReelGen worker.
//!
//! Each capability — text-to-speech, image generation, video generation,
//! stock-video search, image editing, transcription — is a client with a
//! primary provider and ordered fallbacks. Generated artifacts are cached
//! through `reel-cache`, keyed by the *requested* provider so a
//! fallback-produced artifact never poisons the primary's key.

pub mod edit;
pub mod error;
pub mod image;
pub mod stock;
pub mod transcribe;
pub mod tts;
pub mod video;

pub use edit::ImageEditClient;
pub use error::{ProviderError, ProviderResult};
pub use image::{ImageGenClient, ImageGenConfig, ImageRequest};
pub use stock::{StockSearchClient, StockSearchConfig, StockVideo};
pub use transcribe::{TranscriptionClient, TranscriptionConfig};
pub use tts::{NarrationGenerator, TtsConfig};
pub use video::{VideoGenClient, VideoGenConfig, VideoRequest};
