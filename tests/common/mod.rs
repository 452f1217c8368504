#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashbrown::HashMap;
use klangfeld::{AssetCache, AudioError, Fetch};

pub const RATE: u32 = 8_000;

/// A mono 16-bit WAV holding `secs` of a constant level.
pub fn constant_wav(level: f32, secs: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut bytes, spec).unwrap();
        let value = (level * i16::MAX as f32) as i16;
        for _ in 0..(secs * RATE as f32) as usize {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    bytes.into_inner()
}

/// Serves canned bytes and counts every request.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<AtomicUsize>,
}

impl MemoryFetcher {
    pub fn with(self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(url.to_string(), bytes);
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn cache(&self) -> AssetCache {
        AssetCache::new(self.clone())
    }
}

#[async_trait]
impl Fetch for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AudioError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AudioError::FetchFailed {
                url: url.to_string(),
                reason: "404".into(),
            })
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Seconds to frames at the fixture rate.
pub fn frames(secs: f64) -> usize {
    (secs * RATE as f64).round() as usize
}
