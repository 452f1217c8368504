//! Fetching, decoding and caching audio assets.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::future::join_all;
use hashbrown::HashMap;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};
use url::Url;

use crate::buffer::AudioBuffer;
use crate::error::AudioError;

/// Retrieves the raw bytes of an asset.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AudioError>;
}

/// Fetches `http(s)://` URLs over the network and `file://` URLs from disk.
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn fetch_failed(url: &str, reason: impl ToString) -> AudioError {
    AudioError::FetchFailed {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AudioError> {
        let parsed = Url::parse(url).map_err(|e| fetch_failed(url, e))?;

        match parsed.scheme() {
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| fetch_failed(url, "not a local file path"))?;
                tokio::fs::read(&path).await.map_err(|e| fetch_failed(url, e))
            }
            "http" | "https" => {
                let response = self
                    .client
                    .get(parsed)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| fetch_failed(url, e))?;
                let bytes = response.bytes().await.map_err(|e| fetch_failed(url, e))?;
                Ok(bytes.to_vec())
            }
            other => Err(fetch_failed(url, format!("unsupported scheme {:?}", other))),
        }
    }
}

/// Decode an encoded asset into interleaved samples.
///
/// `url` is only used for the container hint and error messages.
pub fn decode_bytes(url: &str, bytes: Vec<u8>) -> Result<AudioBuffer, AudioError> {
    let decode_failed = |reason: String| AudioError::DecodeFailed {
        url: url.to_string(),
        reason,
    };

    let cursor = std::io::Cursor::new(bytes);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension(url) {
        hint.with_extension(&ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_failed(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| decode_failed("no audio track".into()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_failed(e.to_string()))?;

    let mut samples = Vec::new();
    let mut scratch: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_failed(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // corrupt packet: skip it, keep the rest
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("skipping undecodable packet in {}: {}", url, e);
                continue;
            }
            Err(e) => return Err(decode_failed(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count());

        let frames = decoded.capacity() as u64;
        let needed = decoded.capacity() * spec.channels.count();
        if scratch.as_ref().map_or(true, |buf| buf.capacity() < needed) {
            scratch = Some(SampleBuffer::new(frames, spec));
        }
        if let Some(buf) = scratch.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| decode_failed("unknown sample rate".into()))?;
    let channels = channels.ok_or_else(|| decode_failed("unknown channel layout".into()))?;
    if samples.is_empty() {
        return Err(decode_failed("no audio frames".into()));
    }

    Ok(AudioBuffer::new(samples, channels, sample_rate))
}

fn extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

type Slot = Arc<OnceCell<Arc<AudioBuffer>>>;

struct CacheInner {
    fetcher: Arc<dyn Fetch>,
    entries: Mutex<HashMap<String, Slot>>,
}

/// Decoded-buffer cache keyed by URL.
///
/// Clones share the same storage. Concurrent requests for one URL share a
/// single fetch and decode. Entries are never evicted and failures are never
/// cached, so a failed URL is retried on the next request.
#[derive(Clone)]
pub struct AssetCache {
    inner: Arc<CacheInner>,
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new(HttpFetcher::new())
    }
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache").field("len", &self.len()).finish()
    }
}

impl AssetCache {
    pub fn new(fetcher: impl Fetch + 'static) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                fetcher: Arc::new(fetcher),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn slot(&self, url: &str) -> Slot {
        let mut entries = self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.entry(url.to_string()).or_default().clone()
    }

    /// Fetch and decode `url`, or return the cached buffer.
    pub async fn decode(&self, url: &str) -> Result<Arc<AudioBuffer>, AudioError> {
        let slot = self.slot(url);
        if let Some(buffer) = slot.get() {
            trace!("cache hit for {}", url);
            return Ok(buffer.clone());
        }

        let buffer = slot
            .get_or_try_init(|| async {
                let bytes = self.inner.fetcher.fetch(url).await?;
                let owned_url = url.to_string();
                let buffer = tokio::task::spawn_blocking(move || decode_bytes(&owned_url, bytes))
                    .await
                    .map_err(|e| AudioError::DecodeFailed {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })??;
                debug!(
                    "decoded {} ({} frames, {} ch, {} Hz)",
                    url,
                    buffer.frames(),
                    buffer.channels(),
                    buffer.sample_rate()
                );
                Ok::<_, AudioError>(Arc::new(buffer))
            })
            .await?;

        Ok(buffer.clone())
    }

    /// Decode every URL in parallel and report each outcome.
    ///
    /// A failure never stops the other URLs from loading.
    pub async fn preload<I, S>(&self, urls: I) -> Vec<(String, Result<Arc<AudioBuffer>, AudioError>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        let results = join_all(urls.iter().map(|url| self.decode(url))).await;
        urls.into_iter().zip(results).collect()
    }

    /// Like [`preload`](Self::preload) but fails with [`AudioError::Preload`]
    /// (carrying every individual failure) if any URL could not be loaded.
    pub async fn load_all<I, S>(&self, urls: I) -> Result<HashMap<String, Arc<AudioBuffer>>, AudioError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut loaded = HashMap::new();
        let mut errors = Vec::new();

        for (url, result) in self.preload(urls).await {
            match result {
                Ok(buffer) => {
                    loaded.insert(url, buffer);
                }
                Err(e) => {
                    warn!("failed to load {}: {}", url, e);
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(loaded)
        } else {
            Err(AudioError::Preload(errors))
        }
    }

    /// A decoded buffer, if `url` has finished loading.
    pub fn get(&self, url: &str) -> Option<Arc<AudioBuffer>> {
        let entries = self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(url).and_then(|slot| slot.get().cloned())
    }

    /// Store an already-decoded buffer. An existing entry is kept.
    pub fn insert(&self, url: &str, buffer: AudioBuffer) -> Arc<AudioBuffer> {
        let slot = self.slot(url);
        let buffer = Arc::new(buffer);
        match slot.set(buffer.clone()) {
            Ok(()) => buffer,
            Err(_) => slot.get().cloned().unwrap_or(buffer),
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.get(url).is_some()
    }

    /// Number of decoded buffers held.
    pub fn len(&self) -> usize {
        let entries = self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
