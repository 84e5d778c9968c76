//! Cache-aware handles around the detection API.
//!
//! `QueryClient` is the cache. It is created by the application root and shared
//! with every handle that reads or invalidates it; nothing here is global.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::client::{DetectionApi, DEFAULT_DETECT_CONFIDENCE, DEFAULT_FRAME_SKIP};
use crate::error::ApiError;
use crate::models::{HealthResponse, ImageDetectionResult, VideoDetectionResult};

pub const HEALTH_QUERY_KEY: &str = "health";

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ===== CACHE =====

struct CacheEntry {
    data: Arc<dyn Any + Send + Sync>,
    updated_at: Instant,
    invalidated: bool,
}

#[derive(Default)]
pub struct QueryClient {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = lock(&self.entries).keys().cloned().collect();
        f.debug_struct("QueryClient").field("keys", &keys).finish()
    }
}

impl QueryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_query_data<T>(&self, key: &str, data: T) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        let data = Arc::new(data);
        lock(&self.entries).insert(
            key.to_string(),
            CacheEntry {
                data: data.clone(),
                updated_at: Instant::now(),
                invalidated: false,
            },
        );
        data
    }

    /// Cached data for `key`, stale or not
    pub fn get_query_data<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let entries = lock(&self.entries);
        let entry = entries.get(key)?;
        entry.data.clone().downcast::<T>().ok()
    }

    /// Missing, invalidated and expired entries are stale
    pub fn is_stale(&self, key: &str, stale_time: Duration) -> bool {
        match lock(&self.entries).get(key) {
            Some(entry) => entry.invalidated || entry.updated_at.elapsed() >= stale_time,
            None => true,
        }
    }

    /// Marks the entry stale so the next read refetches it
    pub fn invalidate_queries(&self, key: &str) {
        if let Some(entry) = lock(&self.entries).get_mut(key) {
            entry.invalidated = true;
            tracing::debug!("Invalidated query '{}'", key);
        }
    }
}

// ===== QUERIES =====

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// How long fetched data counts as fresh
    pub stale_time: Duration,
    /// Extra attempts after a failed fetch
    pub retry: u32,
    /// Delay before the first retry; doubles per attempt up to 30 s
    pub retry_delay: Duration,
    pub refetch_on_focus: bool,
    pub enabled: bool,
}

impl QueryOptions {
    pub fn health() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            retry: 1,
            retry_delay: Duration::from_secs(1),
            refetch_on_focus: true,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error(ApiError),
}

/// Polled health check of the detection service
pub struct HealthQuery<A> {
    api: Arc<A>,
    cache: Arc<QueryClient>,
    options: QueryOptions,
    status: Mutex<QueryStatus>,
}

impl<A: DetectionApi> HealthQuery<A> {
    pub fn new(api: Arc<A>, cache: Arc<QueryClient>) -> Self {
        Self::with_options(api, cache, QueryOptions::health())
    }

    pub fn with_options(api: Arc<A>, cache: Arc<QueryClient>, options: QueryOptions) -> Self {
        Self {
            api,
            cache,
            options,
            status: Mutex::new(QueryStatus::Idle),
        }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn status(&self) -> QueryStatus {
        lock(&self.status).clone()
    }

    pub fn is_stale(&self) -> bool {
        self.cache.is_stale(HEALTH_QUERY_KEY, self.options.stale_time)
    }

    /// Fresh cached data, or a new fetch when the entry is stale.
    /// A disabled query never fetches and returns whatever is cached.
    pub async fn data(&self) -> Result<Option<Arc<HealthResponse>>, ApiError> {
        if !self.options.enabled || !self.is_stale() {
            return Ok(self.cache.get_query_data(HEALTH_QUERY_KEY));
        }
        self.refetch().await.map(Some)
    }

    /// Fetches regardless of freshness, retrying per the query options
    pub async fn refetch(&self) -> Result<Arc<HealthResponse>, ApiError> {
        *lock(&self.status) = QueryStatus::Loading;

        let mut attempt = 0;
        loop {
            match self.api.check_health().await {
                Ok(health) => {
                    let data = self.cache.set_query_data(HEALTH_QUERY_KEY, health);
                    *lock(&self.status) = QueryStatus::Success;
                    return Ok(data);
                }
                Err(e) if attempt < self.options.retry => {
                    let delay = self
                        .options
                        .retry_delay
                        .saturating_mul(2u32.saturating_pow(attempt))
                        .min(MAX_RETRY_DELAY);
                    tracing::debug!("Health check failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("Health check failed: {}", e);
                    *lock(&self.status) = QueryStatus::Error(e.clone());
                    return Err(e);
                }
            }
        }
    }

    /// Call when the application regains focus. Refetches a stale entry if enabled.
    pub async fn on_focus(&self) -> Option<Result<Arc<HealthResponse>, ApiError>> {
        if !self.options.enabled || !self.options.refetch_on_focus || !self.is_stale() {
            return None;
        }
        Some(self.refetch().await)
    }
}

// ===== MUTATIONS =====

#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    Idle,
    Pending,
    Success(T),
    Error(ApiError),
}

type SuccessCallback<T> = Box<dyn FnOnce(&T) + Send>;
type ErrorCallback = Box<dyn FnOnce(&ApiError) + Send>;

/// Continuations for one mutation call; each fires at most once
pub struct MutationCallbacks<T> {
    on_success: Option<SuccessCallback<T>>,
    on_error: Option<ErrorCallback>,
}

impl<T> Default for MutationCallbacks<T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
        }
    }
}

impl<T> MutationCallbacks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, callback: impl FnOnce(&T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&ApiError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

/// One-shot operation that invalidates a query when it succeeds. Never retried.
pub struct Mutation<T> {
    cache: Arc<QueryClient>,
    invalidates: &'static str,
    state: Mutex<MutationState<T>>,
}

impl<T: Clone> Mutation<T> {
    pub fn new(cache: Arc<QueryClient>, invalidates: &'static str) -> Self {
        Self {
            cache,
            invalidates,
            state: Mutex::new(MutationState::Idle),
        }
    }

    pub fn state(&self) -> MutationState<T> {
        lock(&self.state).clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*lock(&self.state), MutationState::Pending)
    }

    pub fn reset(&self) {
        *lock(&self.state) = MutationState::Idle;
    }

    pub async fn run<F>(&self, operation: F, callbacks: MutationCallbacks<T>) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        *lock(&self.state) = MutationState::Pending;
        let mut guard = PendingGuard {
            state: &self.state,
            settled: false,
        };

        let outcome = operation.await;
        guard.settled = true;

        match outcome {
            Ok(data) => {
                self.cache.invalidate_queries(self.invalidates);
                *lock(&self.state) = MutationState::Success(data.clone());
                if let Some(on_success) = callbacks.on_success {
                    on_success(&data);
                }
                Ok(data)
            }
            Err(e) => {
                *lock(&self.state) = MutationState::Error(e.clone());
                if let Some(on_error) = callbacks.on_error {
                    on_error(&e);
                }
                Err(e)
            }
        }
    }
}

/// Puts an abandoned run back to `Idle` when its future is dropped before the operation finished
struct PendingGuard<'a, T> {
    state: &'a Mutex<MutationState<T>>,
    settled: bool,
}

impl<T> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = lock(self.state);
        if matches!(*state, MutationState::Pending) {
            *state = MutationState::Idle;
            tracing::debug!("Mutation dropped before completing");
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectImageVars {
    pub image_uri: String,
    pub confidence: Option<f64>,
}

impl DetectImageVars {
    pub fn new(image_uri: impl Into<String>) -> Self {
        Self {
            image_uri: image_uri.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectVideoVars {
    pub video_uri: String,
    pub confidence: Option<f64>,
    pub frame_skip: Option<u32>,
}

impl DetectVideoVars {
    pub fn new(video_uri: impl Into<String>) -> Self {
        Self {
            video_uri: video_uri.into(),
            confidence: None,
            frame_skip: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_frame_skip(mut self, frame_skip: u32) -> Self {
        self.frame_skip = Some(frame_skip);
        self
    }
}

// ===== DETECTION HOOKS =====

/// The health query and both submission mutations over one API and one cache
pub struct DetectionHooks<A> {
    api: Arc<A>,
    health: HealthQuery<A>,
    image: Mutation<ImageDetectionResult>,
    video: Mutation<VideoDetectionResult>,
}

impl<A: DetectionApi> DetectionHooks<A> {
    pub fn new(api: Arc<A>, cache: Arc<QueryClient>) -> Self {
        Self {
            health: HealthQuery::new(api.clone(), cache.clone()),
            image: Mutation::new(cache.clone(), HEALTH_QUERY_KEY),
            video: Mutation::new(cache, HEALTH_QUERY_KEY),
            api,
        }
    }

    pub fn health(&self) -> &HealthQuery<A> {
        &self.health
    }

    pub fn image_state(&self) -> MutationState<ImageDetectionResult> {
        self.image.state()
    }

    pub fn video_state(&self) -> MutationState<VideoDetectionResult> {
        self.video.state()
    }

    pub fn is_pending(&self) -> bool {
        self.image.is_pending() || self.video.is_pending()
    }

    pub async fn detect_image(
        &self,
        vars: DetectImageVars,
        callbacks: MutationCallbacks<ImageDetectionResult>,
    ) -> Result<ImageDetectionResult, ApiError> {
        let confidence = vars.confidence.unwrap_or(DEFAULT_DETECT_CONFIDENCE);
        self.image
            .run(self.api.detect_image(&vars.image_uri, confidence), callbacks)
            .await
    }

    pub async fn detect_video(
        &self,
        vars: DetectVideoVars,
        callbacks: MutationCallbacks<VideoDetectionResult>,
    ) -> Result<VideoDetectionResult, ApiError> {
        let confidence = vars.confidence.unwrap_or(DEFAULT_DETECT_CONFIDENCE);
        let frame_skip = vars.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP);
        self.video
            .run(
                self.api.detect_video(&vars.video_uri, confidence, frame_skip),
                callbacks,
            )
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Detection, Severity, VideoFrameResult};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted stand-in for the detection service
    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub health_calls: AtomicUsize,
        pub image_calls: AtomicUsize,
        pub health_script: Mutex<VecDeque<Result<HealthResponse, ApiError>>>,
        pub image_error: Mutex<Option<ApiError>>,
        pub last_image_request: Mutex<Option<(String, f64)>>,
        pub last_video_request: Mutex<Option<(String, f64, u32)>>,
    }

    pub(crate) fn healthy_response() -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            model: "seed-detector".to_string(),
            classes: Default::default(),
            service: None,
            model_loaded: None,
        }
    }

    pub(crate) fn image_result() -> ImageDetectionResult {
        ImageDetectionResult {
            success: true,
            disease_name: "Leaf Rust".to_string(),
            confidence: 0.87,
            severity: Severity::High,
            description: "Orange pustules on leaves".to_string(),
            recommendations: vec!["Remove infected leaves".to_string()],
            detections: vec![
                Detection::new("healthy", 0.9, [0.0, 0.0, 10.0, 10.0]),
                Detection::new("damage", 0.8, [5.0, 5.0, 20.0, 20.0]),
            ],
            total_detections: 2,
            annotated_url: "http://host/static/annotated.jpg".to_string(),
        }
    }

    pub(crate) fn video_result() -> VideoDetectionResult {
        VideoDetectionResult {
            success: true,
            total_frames: 30,
            frames_processed: 10,
            total_detections: 2,
            frame_results: vec![
                VideoFrameResult {
                    frame: 0,
                    detections: vec![Detection::new("healthy", 0.9, [0.0; 4])],
                    count: 1,
                },
                VideoFrameResult {
                    frame: 3,
                    detections: vec![Detection::new("healthy", 0.7, [0.0; 4])],
                    count: 1,
                },
            ],
            annotated_url: "http://host/static/annotated.mp4".to_string(),
        }
    }

    impl FakeApi {
        pub(crate) fn with_health(script: Vec<Result<HealthResponse, ApiError>>) -> Self {
            Self {
                health_script: Mutex::new(script.into()),
                ..Default::default()
            }
        }
    }

    impl DetectionApi for FakeApi {
        async fn detect_image(
            &self,
            media_uri: &str,
            confidence: f64,
        ) -> Result<ImageDetectionResult, ApiError> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            *lock(&self.last_image_request) = Some((media_uri.to_string(), confidence));
            match lock(&self.image_error).clone() {
                Some(e) => Err(e),
                None => Ok(image_result()),
            }
        }

        async fn detect_video(
            &self,
            media_uri: &str,
            confidence: f64,
            frame_skip: u32,
        ) -> Result<VideoDetectionResult, ApiError> {
            *lock(&self.last_video_request) = Some((media_uri.to_string(), confidence, frame_skip));
            Ok(video_result())
        }

        async fn check_health(&self) -> Result<HealthResponse, ApiError> {
            self.health_calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.health_script)
                .pop_front()
                .unwrap_or_else(|| Ok(healthy_response()))
        }
    }

    fn hooks(api: FakeApi) -> (Arc<FakeApi>, DetectionHooks<FakeApi>) {
        let api = Arc::new(api);
        let hooks = DetectionHooks::new(api.clone(), Arc::new(QueryClient::new()));
        (api, hooks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_is_fresh_for_thirty_seconds() {
        let (api, hooks) = hooks(FakeApi::default());

        assert!(hooks.health().data().await.unwrap().is_some());
        assert!(hooks.health().data().await.unwrap().is_some());
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.health().status(), QueryStatus::Success);

        tokio::time::advance(Duration::from_secs(29)).await;
        hooks.health().data().await.unwrap();
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        hooks.health().data().await.unwrap();
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_retries_once() {
        let (api, hooks) = hooks(FakeApi::with_health(vec![
            Err(ApiError::network()),
            Ok(healthy_response()),
        ]));

        let health = hooks.health().data().await.unwrap().unwrap();
        assert_eq!(health.model, "seed-detector");
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_error_after_retry() {
        let (api, hooks) = hooks(FakeApi::with_health(vec![
            Err(ApiError::network()),
            Err(ApiError::new("model not loaded", 503, None)),
            Ok(healthy_response()),
        ]));

        let err = hooks.health().data().await.unwrap_err();
        assert_eq!(err.status, 503);
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.health().status(), QueryStatus::Error(err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_refetches_only_stale_data() {
        let (api, hooks) = hooks(FakeApi::default());

        // nothing cached yet
        assert!(hooks.health().on_focus().await.is_some());
        assert!(hooks.health().on_focus().await.is_none());
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(hooks.health().on_focus().await.is_some());
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_query_does_not_fetch() {
        let api = Arc::new(FakeApi::default());
        let options = QueryOptions {
            enabled: false,
            ..QueryOptions::health()
        };
        let query = HealthQuery::with_options(api.clone(), Arc::new(QueryClient::new()), options);

        assert!(query.data().await.unwrap().is_none());
        assert!(query.on_focus().await.is_none());
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 0);
        assert_eq!(query.status(), QueryStatus::Idle);
    }

    #[tokio::test]
    async fn test_successful_detection_invalidates_health() {
        let (api, hooks) = hooks(FakeApi::default());

        hooks.health().data().await.unwrap();
        assert!(!hooks.health().is_stale());

        let successes = Arc::new(AtomicUsize::new(0));
        let counter = successes.clone();
        let result = hooks
            .detect_image(
                DetectImageVars::new("file:///tmp/leaf.jpg"),
                MutationCallbacks::new()
                    .on_success(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_error(|e| panic!("unexpected error {}", e)),
            )
            .await
            .unwrap();

        assert_eq!(result.disease_name, "Leaf Rust");
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert!(hooks.health().is_stale());
        assert_eq!(hooks.image_state(), MutationState::Success(result));

        hooks.health().data().await.unwrap();
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_detection_keeps_health_and_error() {
        let api = FakeApi::default();
        *lock(&api.image_error) = Some(ApiError::new("bad file", 415, Some("UNSUPPORTED".to_string())));
        let (api, hooks) = hooks(api);

        hooks.health().data().await.unwrap();

        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();
        let err = hooks
            .detect_image(
                DetectImageVars::new("/tmp/leaf.gif"),
                MutationCallbacks::new()
                    .on_success(|_| panic!("should not succeed"))
                    .on_error(move |e| lock(&seen).push(e.clone())),
            )
            .await
            .unwrap_err();

        assert_eq!(err.message, "bad file");
        assert_eq!(err.status, 415);
        assert_eq!(err.code.as_deref(), Some("UNSUPPORTED"));
        assert_eq!(*lock(&errors), vec![err.clone()]);
        assert_eq!(hooks.image_state(), MutationState::Error(err));
        assert!(!hooks.health().is_stale());
        // never retried
        assert_eq!(api.image_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_mutation_returns_to_idle() {
        let mutation: Mutation<ImageDetectionResult> =
            Mutation::new(Arc::new(QueryClient::new()), HEALTH_QUERY_KEY);

        let called = Arc::new(AtomicUsize::new(0));
        let (on_success, on_error) = (called.clone(), called.clone());
        let callbacks = MutationCallbacks::new()
            .on_success(move |_| {
                on_success.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                on_error.fetch_add(1, Ordering::SeqCst);
            });

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            mutation.run(std::future::pending(), callbacks),
        )
        .await;

        assert!(timed_out.is_err());
        assert!(!mutation.is_pending());
        assert_eq!(mutation.state(), MutationState::Idle);
        assert_eq!(called.load(Ordering::SeqCst), 0);

        // a later run still settles normally
        let result = mutation
            .run(async { Ok(image_result()) }, MutationCallbacks::new())
            .await
            .unwrap();
        assert_eq!(mutation.state(), MutationState::Success(result));
    }

    #[tokio::test]
    async fn test_default_vars_applied() {
        let (api, hooks) = hooks(FakeApi::default());

        hooks
            .detect_image(DetectImageVars::new("/tmp/a.jpg"), MutationCallbacks::new())
            .await
            .unwrap();
        assert_eq!(
            *lock(&api.last_image_request),
            Some(("/tmp/a.jpg".to_string(), DEFAULT_DETECT_CONFIDENCE))
        );

        hooks
            .detect_video(
                DetectVideoVars::new("/tmp/a.mov").with_confidence(0.6),
                MutationCallbacks::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            *lock(&api.last_video_request),
            Some(("/tmp/a.mov".to_string(), 0.6, DEFAULT_FRAME_SKIP))
        );
        assert!(!hooks.is_pending());
    }
}
