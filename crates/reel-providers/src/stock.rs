//! Stock-video search over Pixabay (primary) and a Pexels-style service
//! (secondary).
//!
//! Pages are visited in a random order per keyword; pagination stops early
//! when a page comes back short. Results from both providers are merged,
//! de-duplicated by URL, and shuffled.

use std::collections::HashSet;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// One stock-video search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockVideo {
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Duration in seconds
    pub duration: u32,
    /// `pixabay` or `pexels`
    pub source: String,
    /// The keyword that produced this hit
    pub query: String,
}

/// Stock search configuration.
#[derive(Debug, Clone)]
pub struct StockSearchConfig {
    pub pixabay_api_key: Option<String>,
    pub pexels_api_key: Option<String>,
    pub pixabay_base: String,
    pub pexels_base: String,
    /// Pages visited per keyword, at most
    pub max_pages_per_keyword: u32,
    /// Requested page size
    pub per_page: u32,
}

impl Default for StockSearchConfig {
    fn default() -> Self {
        Self {
            pixabay_api_key: None,
            pexels_api_key: None,
            pixabay_base: "https://pixabay.com/api/videos".to_string(),
            pexels_base: "https://api.pexels.com/videos".to_string(),
            max_pages_per_keyword: 3,
            per_page: 30,
        }
    }
}

impl StockSearchConfig {
    pub fn from_env() -> Self {
        Self {
            pixabay_api_key: std::env::var("PIXABAY_API_KEY").ok(),
            pexels_api_key: std::env::var("PEXELS_API_KEY").ok(),
            ..Default::default()
        }
    }
}

/// Stock-video search client.
pub struct StockSearchClient {
    config: StockSearchConfig,
    http: reqwest::Client,
}

impl StockSearchClient {
    pub fn new(config: StockSearchConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Search all configured providers for each keyword. Portrait
    /// orientation only.
    pub async fn search(
        &self,
        keywords: &[String],
        per_keyword_cap: usize,
    ) -> ProviderResult<Vec<StockVideo>> {
        if self.config.pixabay_api_key.is_none() && self.config.pexels_api_key.is_none() {
            return Err(ProviderError::missing_credentials("stock video search"));
        }

        let mut results = Vec::new();
        for keyword in keywords {
            if self.config.pixabay_api_key.is_some() {
                match self.search_provider_paged(keyword, per_keyword_cap, true).await {
                    Ok(mut hits) => results.append(&mut hits),
                    Err(e) => warn!(keyword = %keyword, error = %e, "Pixabay search failed"),
                }
            }
            if self.config.pexels_api_key.is_some() {
                match self.search_provider_paged(keyword, per_keyword_cap, false).await {
                    Ok(mut hits) => results.append(&mut hits),
                    Err(e) => warn!(keyword = %keyword, error = %e, "Pexels search failed"),
                }
            }
        }

        Ok(merge_results(results))
    }

    async fn search_provider_paged(
        &self,
        keyword: &str,
        cap: usize,
        pixabay: bool,
    ) -> ProviderResult<Vec<StockVideo>> {
        let mut pages: Vec<u32> = (1..=self.config.max_pages_per_keyword).collect();
        pages.shuffle(&mut rand::thread_rng());

        let mut hits = Vec::new();
        for page in pages {
            if hits.len() >= cap {
                break;
            }
            let page_hits = if pixabay {
                self.pixabay_page(keyword, page).await?
            } else {
                self.pexels_page(keyword, page).await?
            };
            let short_page = (page_hits.len() as u32) < self.config.per_page;
            hits.extend(page_hits);

            if short_page {
                debug!(keyword, page, "Short page, stopping pagination");
                break;
            }
        }

        hits.truncate(cap);
        Ok(hits)
    }

    async fn pixabay_page(&self, keyword: &str, page: u32) -> ProviderResult<Vec<StockVideo>> {
        let api_key = self
            .config
            .pixabay_api_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("pixabay"))?;

        #[derive(Deserialize)]
        struct PixabayResponse {
            #[serde(default)]
            hits: Vec<PixabayHit>,
        }
        #[derive(Deserialize)]
        struct PixabayHit {
            duration: u32,
            videos: PixabayVariants,
        }
        #[derive(Deserialize)]
        struct PixabayVariants {
            #[serde(default)]
            large: Option<PixabayFile>,
            #[serde(default)]
            medium: Option<PixabayFile>,
        }
        #[derive(Deserialize)]
        struct PixabayFile {
            url: String,
            width: u32,
            height: u32,
        }

        let response = self
            .http
            .get(&self.config.pixabay_base)
            .query(&[
                ("key", api_key.as_str()),
                ("q", keyword),
                ("per_page", &self.config.per_page.to_string()),
                ("page", &page.to_string()),
                ("orientation", "vertical"),
            ])
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::transient(
                "pixabay",
                format!("HTTP {}", response.status().as_u16()),
            ));
        }

        let parsed: PixabayResponse = response.json().await?;
        Ok(parsed
            .hits
            .into_iter()
            .filter_map(|hit| {
                let file = hit.videos.large.or(hit.videos.medium)?;
                Some(StockVideo {
                    url: file.url,
                    width: file.width,
                    height: file.height,
                    duration: hit.duration,
                    source: "pixabay".to_string(),
                    query: keyword.to_string(),
                })
            })
            .collect())
    }

    async fn pexels_page(&self, keyword: &str, page: u32) -> ProviderResult<Vec<StockVideo>> {
        let api_key = self
            .config
            .pexels_api_key
            .as_ref()
            .ok_or_else(|| ProviderError::missing_credentials("pexels"))?;

        #[derive(Deserialize)]
        struct PexelsResponse {
            #[serde(default)]
            videos: Vec<PexelsVideo>,
        }
        #[derive(Deserialize)]
        struct PexelsVideo {
            width: u32,
            height: u32,
            duration: u32,
            #[serde(default)]
            video_files: Vec<PexelsFile>,
        }
        #[derive(Deserialize)]
        struct PexelsFile {
            link: String,
        }

        let response = self
            .http
            .get(format!("{}/search", self.config.pexels_base))
            .header("Authorization", api_key)
            .query(&[
                ("query", keyword),
                ("per_page", &self.config.per_page.to_string()),
                ("page", &page.to_string()),
                ("orientation", "portrait"),
            ])
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::transient(
                "pexels",
                format!("HTTP {}", response.status().as_u16()),
            ));
        }

        let parsed: PexelsResponse = response.json().await?;
        Ok(parsed
            .videos
            .into_iter()
            .filter_map(|video| {
                let file = video.video_files.into_iter().next()?;
                Some(StockVideo {
                    url: file.link,
                    width: video.width,
                    height: video.height,
                    duration: video.duration,
                    source: "pexels".to_string(),
                    query: keyword.to_string(),
                })
            })
            .collect())
    }
}

/// De-duplicate by URL and shuffle the merged set.
fn merge_results(results: Vec<StockVideo>) -> Vec<StockVideo> {
    let mut seen = HashSet::new();
    let mut merged: Vec<StockVideo> = results
        .into_iter()
        .filter(|video| seen.insert(video.url.clone()))
        .collect();
    merged.shuffle(&mut rand::thread_rng());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn video(url: &str) -> StockVideo {
        StockVideo {
            url: url.to_string(),
            width: 1080,
            height: 1920,
            duration: 10,
            source: "pixabay".to_string(),
            query: "city".to_string(),
        }
    }

    #[test]
    fn test_merge_dedupes_by_url() {
        let merged = merge_results(vec![
            video("https://e.com/a.mp4"),
            video("https://e.com/a.mp4"),
            video("https://e.com/b.mp4"),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn test_pixabay_parsing_and_orientation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("orientation", "vertical"))
            .and(query_param("q", "city"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hits": [
                    {
                        "duration": 12,
                        "videos": {
                            "large": {"url": "https://cdn.pixabay.com/a.mp4", "width": 1080, "height": 1920},
                            "medium": {"url": "https://cdn.pixabay.com/a-m.mp4", "width": 540, "height": 960}
                        }
                    },
                    {
                        "duration": 7,
                        "videos": {
                            "medium": {"url": "https://cdn.pixabay.com/b-m.mp4", "width": 540, "height": 960}
                        }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = StockSearchClient::new(StockSearchConfig {
            pixabay_api_key: Some("pk".to_string()),
            pixabay_base: server.uri(),
            ..Default::default()
        });

        let hits = client.pixabay_page("city", 1).await.unwrap();
        assert_eq!(hits.len(), 2);
        // The large variant wins when present.
        assert_eq!(hits[0].url, "https://cdn.pixabay.com/a.mp4");
        assert_eq!(hits[1].url, "https://cdn.pixabay.com/b-m.mp4");
        assert_eq!(hits[0].source, "pixabay");
    }

    #[tokio::test]
    async fn test_search_requires_some_provider() {
        let client = StockSearchClient::new(StockSearchConfig::default());
        let err = client.search(&["city".to_string()], 10).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn test_short_page_stops_pagination() {
        let server = MockServer::start().await;
        // Every page returns a single hit, far below per_page: only one
        // page request should be issued.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hits": [{
                    "duration": 5,
                    "videos": {"large": {"url": "https://cdn.pixabay.com/x.mp4", "width": 1080, "height": 1920}}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StockSearchClient::new(StockSearchConfig {
            pixabay_api_key: Some("pk".to_string()),
            pixabay_base: server.uri(),
            max_pages_per_keyword: 5,
            ..Default::default()
        });

        let hits = client.search_provider_paged("city", 50, true).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
