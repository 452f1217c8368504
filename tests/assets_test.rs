mod common;

use common::{constant_wav, MemoryFetcher, RATE};
use futures_util::future::join;
use klangfeld::AudioError;

#[tokio::test]
async fn concurrent_requests_share_one_fetch() {
    let fetcher = MemoryFetcher::default().with("mem://a.wav", constant_wav(0.5, 0.25));
    let cache = fetcher.cache();

    let (a, b) = join(cache.decode("mem://a.wav"), cache.decode("mem://a.wav")).await;
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(fetcher.requests(), 1);

    let again = cache.decode("mem://a.wav").await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, &again));
    assert_eq!(fetcher.requests(), 1);

    assert_eq!(a.sample_rate(), RATE);
    assert_eq!(a.channels(), 1);
    assert_eq!(a.frames(), (RATE / 4) as usize);
}

#[tokio::test]
async fn clones_share_storage() {
    let fetcher = MemoryFetcher::default().with("mem://a.wav", constant_wav(0.5, 0.25));
    let cache = fetcher.cache();
    let other = cache.clone();

    cache.decode("mem://a.wav").await.unwrap();
    assert!(other.contains("mem://a.wav"));
    other.decode("mem://a.wav").await.unwrap();
    assert_eq!(fetcher.requests(), 1);
}

#[tokio::test]
async fn failures_are_retried() {
    let fetcher = MemoryFetcher::default();
    let cache = fetcher.cache();

    let err = cache.decode("mem://late.wav").await.unwrap_err();
    assert!(matches!(err, AudioError::FetchFailed { .. }));
    assert!(!cache.contains("mem://late.wav"));

    let fetcher = fetcher.with("mem://late.wav", constant_wav(0.5, 0.25));
    cache.decode("mem://late.wav").await.unwrap();
    assert_eq!(fetcher.requests(), 2);
}

#[tokio::test]
async fn undecodable_bytes_are_reported_per_url() {
    let fetcher = MemoryFetcher::default()
        .with("mem://good.wav", constant_wav(0.5, 0.25))
        .with("mem://junk.wav", b"definitely not audio".to_vec());
    let cache = fetcher.cache();

    let results = cache.preload(["mem://good.wav", "mem://junk.wav"]).await;
    assert_eq!(results.len(), 2);
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(AudioError::DecodeFailed { .. })));

    let err = cache.load_all(["mem://good.wav", "mem://junk.wav"]).await.unwrap_err();
    match err {
        AudioError::Preload(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].url(), Some("mem://junk.wav"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}
