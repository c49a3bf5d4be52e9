//! Shared worker context: configuration plus every external client used by
//! the pipeline.

use std::sync::Arc;

use reel_cache::ArtifactCache;
use reel_providers::{
    ImageEditClient, ImageGenClient, ImageGenConfig, NarrationGenerator, TranscriptionClient,
    TranscriptionConfig, TtsConfig, VideoGenClient, VideoGenConfig,
};
use reel_storage::R2Client;
use reel_store::StoreClient;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Everything one task invocation needs.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub store: StoreClient,
    pub storage: R2Client,
    pub cache: Arc<ArtifactCache>,
    pub narration: NarrationGenerator,
    pub image_gen: ImageGenClient,
    pub image_edit: ImageEditClient,
    pub video_gen: VideoGenClient,
    pub transcription: TranscriptionClient,
}

impl WorkerContext {
    /// Build the full context from the environment.
    pub async fn from_env(config: WorkerConfig) -> WorkerResult<Arc<Self>> {
        let cache = Arc::new(ArtifactCache::open(config.cache_dir()).await.map_err(
            |e| std::io::Error::other(format!("failed to open cache: {e}")),
        )?);

        let image_config = {
            let mut c = ImageGenConfig::from_env();
            c.reel_w = config.reel_w;
            c.reel_h = config.reel_h;
            c
        };

        Ok(Arc::new(Self {
            store: StoreClient::from_env()?,
            storage: R2Client::from_env()?,
            cache,
            narration: NarrationGenerator::new(TtsConfig::from_env(), &config.temp_dir),
            image_gen: ImageGenClient::new(image_config.clone(), &config.temp_dir),
            image_edit: ImageEditClient::new(image_config, &config.temp_dir),
            video_gen: VideoGenClient::new(VideoGenConfig::from_env(), &config.temp_dir),
            transcription: TranscriptionClient::new(TranscriptionConfig::from_env()),
            config,
        }))
    }
}
