//! In-memory caches for stream URLs and lyrics.
//!
//! Both caches share one shape: a fresh hit is returned directly, a request
//! for a key that is already being fetched joins that fetch, and anything else
//! starts a fetch whose result is stored for later callers. Fetches run on
//! their own task, so a caller that stops waiting does not cancel the fetch
//! for the others.

use crate::backend::{LyricRequest, MusicBackend, StreamUrlRequest};
use crate::config::CacheConfig;
use crate::error::{CoreError, Result};
use crate::lyric::{parse_lyric, ParsedLyric};
use crate::model::{PreferredQuality, Track};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const STREAM_URL_OP: &str = "get_song_url";
const LYRIC_OP: &str = "get_song_lyric";

/// Outcome of a stream URL lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUrlLookup {
    Resolved {
        url: String,
        /// Set when another provider served the song
        fallback_provider: Option<String>,
    },
    /// The backend answered but has nothing playable
    Unavailable {
        reason: Option<String>,
        fallback_provider: Option<String>,
    },
}

/// A lyric as the cache hands it out
#[derive(Debug, Clone)]
pub struct LyricLookup {
    pub lyric: Arc<ParsedLyric>,
    /// Only set when this call fetched from a fallback provider
    pub fallback_provider: Option<String>,
}

type SharedFetch<T> = Shared<BoxFuture<'static, std::result::Result<T, String>>>;

/// Fetches currently running, tagged so a finished fetch only removes itself
struct InFlight<T: Clone> {
    next_id: AtomicU64,
    fetches: Mutex<HashMap<String, (u64, SharedFetch<T>)>>,
}

impl<T: Clone> InFlight<T> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            fetches: Mutex::new(HashMap::new()),
        }
    }

    fn finish(&self, key: &str, id: u64) {
        let mut fetches = self.fetches.lock();
        if fetches.get(key).is_some_and(|(current, _)| *current == id) {
            fetches.remove(key);
        }
    }

    fn len(&self) -> usize {
        self.fetches.lock().len()
    }
}

#[derive(Debug, Clone)]
struct UrlEntry {
    url: String,
    fetched_at: Instant,
}

#[derive(Debug, Clone)]
struct LyricEntry {
    lyric: Arc<ParsedLyric>,
    expire_at: Instant,
}

pub struct AssetCache {
    backend: Arc<dyn MusicBackend>,
    url_ttl: Duration,
    lyric_ttl: Duration,
    lyric_capacity: usize,
    urls: Mutex<HashMap<String, UrlEntry>>,
    url_fetches: InFlight<StreamUrlLookup>,
    lyrics: Mutex<LruCache<String, LyricEntry>>,
    lyric_fetches: InFlight<Option<LyricLookup>>,
}

impl AssetCache {
    #[must_use]
    pub fn new(backend: Arc<dyn MusicBackend>, config: &CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            backend,
            url_ttl: config.stream_url_ttl(),
            lyric_ttl: config.lyric_ttl(),
            lyric_capacity: config.lyric_capacity.max(1),
            urls: Mutex::new(HashMap::new()),
            url_fetches: InFlight::new(),
            lyrics: Mutex::new(LruCache::unbounded()),
            lyric_fetches: InFlight::new(),
        })
    }

    /// Resolve a playable URL for `track`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Backend`] when the backend could not be reached.
    /// A song without a playable source is `Ok(StreamUrlLookup::Unavailable)`.
    pub async fn stream_url(
        self: &Arc<Self>,
        track: &Track,
        quality: PreferredQuality,
    ) -> Result<StreamUrlLookup> {
        let key = cache_key(&track.mid);
        if key.is_empty() {
            return Ok(StreamUrlLookup::Unavailable {
                reason: None,
                fallback_provider: None,
            });
        }
        if let Some(url) = self.cached_stream_url(&key) {
            debug!("Stream URL cache hit for {}", key);
            return Ok(StreamUrlLookup::Resolved {
                url,
                fallback_provider: None,
            });
        }

        let request = StreamUrlRequest::for_track(track, quality);
        let fetch = self.join_or_start(Self::url_fetches, &key, {
            let this = Arc::clone(self);
            let key = key.clone();
            move || async move { this.fetch_stream_url(&key, request).await }
        });

        fetch.await.map_err(|reason| CoreError::Backend {
            operation: STREAM_URL_OP,
            reason,
        })
    }

    async fn fetch_stream_url(
        &self,
        key: &str,
        request: StreamUrlRequest,
    ) -> std::result::Result<StreamUrlLookup, String> {
        debug!("Fetching stream URL for {} ({})", key, request.quality.as_str());
        let response = self
            .backend
            .resolve_stream_url(&request)
            .await
            .map_err(|e| e.to_string())?;

        match response.url.filter(|u| response.success && !u.is_empty()) {
            Some(url) => {
                self.urls.lock().insert(
                    key.to_string(),
                    UrlEntry {
                        url: url.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(StreamUrlLookup::Resolved {
                    url,
                    fallback_provider: response.fallback_provider,
                })
            }
            None => Ok(StreamUrlLookup::Unavailable {
                reason: response.error,
                fallback_provider: response.fallback_provider,
            }),
        }
    }

    /// Fresh cached URL for `mid`, if any. Expired entries are dropped.
    #[must_use]
    pub fn cached_stream_url(&self, mid: &str) -> Option<String> {
        let key = cache_key(mid);
        let mut urls = self.urls.lock();
        match urls.get(&key) {
            Some(entry) if entry.fetched_at.elapsed() < self.url_ttl => Some(entry.url.clone()),
            Some(_) => {
                urls.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Forget the URL for `mid` so the next lookup refetches it.
    pub fn invalidate_stream_url(&self, mid: &str) {
        if self.urls.lock().remove(&cache_key(mid)).is_some() {
            debug!("Invalidated stream URL for {}", mid);
        }
    }

    /// Resolve the lyric for `track`, `None` when the backend has none.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Backend`] when the backend could not be reached.
    pub async fn lyric(self: &Arc<Self>, track: &Track) -> Result<Option<LyricLookup>> {
        let key = cache_key(&track.mid);
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(lyric) = self.cached_lyric(&key) {
            return Ok(Some(LyricLookup {
                lyric,
                fallback_provider: None,
            }));
        }

        let request = LyricRequest::for_track(track);
        let fetch = self.join_or_start(Self::lyric_fetches, &key, {
            let this = Arc::clone(self);
            let key = key.clone();
            move || async move { this.fetch_lyric(&key, request).await }
        });

        fetch.await.map_err(|reason| CoreError::Backend {
            operation: LYRIC_OP,
            reason,
        })
    }

    async fn fetch_lyric(
        &self,
        key: &str,
        request: LyricRequest,
    ) -> std::result::Result<Option<LyricLookup>, String> {
        debug!("Fetching lyric for {}", key);
        let response = self
            .backend
            .resolve_lyric(&request)
            .await
            .map_err(|e| e.to_string())?;

        if !response.success {
            debug!(
                "No lyric for {}: {}",
                key,
                response.error.as_deref().unwrap_or("unknown reason")
            );
            return Ok(None);
        }

        let raw = response.lyric.unwrap_or_default();
        let lyric = Arc::new(parse_lyric(&raw, response.translation.as_deref()));
        self.store_lyric(key, Arc::clone(&lyric));
        Ok(Some(LyricLookup {
            lyric,
            fallback_provider: response.fallback_provider,
        }))
    }

    /// Fresh cached lyric for `mid`, marking it as recently used.
    #[must_use]
    pub fn cached_lyric(&self, mid: &str) -> Option<Arc<ParsedLyric>> {
        let key = cache_key(mid);
        let mut lyrics = self.lyrics.lock();
        let entry = lyrics.get(&key)?;
        if entry.expire_at > Instant::now() {
            return Some(Arc::clone(&entry.lyric));
        }
        lyrics.pop(&key);
        None
    }

    fn store_lyric(&self, key: &str, lyric: Arc<ParsedLyric>) {
        let now = Instant::now();
        let mut lyrics = self.lyrics.lock();
        lyrics.put(
            key.to_string(),
            LyricEntry {
                lyric,
                expire_at: now + self.lyric_ttl,
            },
        );

        let expired: Vec<String> = lyrics
            .iter()
            .filter(|(_, entry)| entry.expire_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            lyrics.pop(&k);
        }
        while lyrics.len() > self.lyric_capacity {
            if let Some((evicted, _)) = lyrics.pop_lru() {
                debug!("Evicted lyric {} from cache", evicted);
            }
        }
    }

    #[must_use]
    pub fn lyric_count(&self) -> usize {
        self.lyrics.lock().len()
    }

    /// Number of fetches currently running, across both caches
    #[must_use]
    pub fn fetches_in_flight(&self) -> usize {
        self.url_fetches.len() + self.lyric_fetches.len()
    }

    /// Warm both caches for `track` in the background.
    pub fn prefetch(self: &Arc<Self>, track: &Track, quality: PreferredQuality) {
        let this = Arc::clone(self);
        let track = track.clone();
        tokio::spawn(async move {
            if let Err(e) = this.stream_url(&track, quality).await {
                debug!("Prefetch of stream URL for {} failed: {}", track.mid, e);
            }
            if let Err(e) = this.lyric(&track).await {
                debug!("Prefetch of lyric for {} failed: {}", track.mid, e);
            }
        });
    }

    pub fn clear(&self) {
        self.urls.lock().clear();
        self.lyrics.lock().clear();
    }

    const fn url_fetches(&self) -> &InFlight<StreamUrlLookup> {
        &self.url_fetches
    }

    const fn lyric_fetches(&self) -> &InFlight<Option<LyricLookup>> {
        &self.lyric_fetches
    }

    fn join_or_start<T, F, Fut>(
        self: &Arc<Self>,
        select: fn(&Self) -> &InFlight<T>,
        key: &str,
        start: F,
    ) -> SharedFetch<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, String>> + Send + 'static,
    {
        let inflight = select(self);
        let mut fetches = inflight.fetches.lock();
        if let Some((_, shared)) = fetches.get(key) {
            debug!("Joining in-flight fetch for {}", key);
            return shared.clone();
        }

        let id = inflight.next_id.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);
        let owned_key = key.to_string();
        let fetch = start();
        let task = tokio::spawn(async move {
            let result = fetch.await;
            // The result is already stored, so later callers hit the cache
            select(&this).finish(&owned_key, id);
            result
        });
        let shared = async move {
            task.await.unwrap_or_else(|e| {
                warn!("Asset fetch task failed: {}", e);
                Err(e.to_string())
            })
        }
        .boxed()
        .shared();

        fetches.insert(key.to_string(), (id, shared.clone()));
        shared
    }
}

fn cache_key(mid: &str) -> String {
    mid.trim().to_string()
}
