//! HTTP surface of the degrading-audio store
//!
//! Every handler delegates to the core stores via `spawn_blocking`: lock
//! acquisition can block up to the configured timeout and all track I/O is
//! synchronous file access, neither of which belongs on a runtime worker.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use ephemera_core::{
    waveform, DegradeCoordinator, FrameStore, MetadataStore, SegmentLockRegistry, StoreConfig,
    StoreError, StreamingService, TrackRecord,
};

/// Seconds of audio per chunk on the chunk endpoint. Chunks are a client
/// convenience an order of magnitude coarser than segments, which stay the
/// unit of locking and degradation.
const CHUNK_DURATION: f64 = 5.0;

#[derive(Clone)]
pub struct AppState {
    pub config: StoreConfig,
    pub frame_store: Arc<FrameStore>,
    pub metadata: Arc<MetadataStore>,
    pub streaming: Arc<StreamingService>,
    pub coordinator: Arc<DegradeCoordinator>,
}

impl AppState {
    pub fn new(config: StoreConfig) -> Self {
        let frame_store = Arc::new(FrameStore::new(
            config.audio_dir.clone(),
            config.segment_duration,
        ));
        let metadata = Arc::new(MetadataStore::new(
            Arc::clone(&frame_store),
            config.metadata_dir.clone(),
        ));
        let locks = Arc::new(SegmentLockRegistry::new(config.lock_timeout));
        let streaming = Arc::new(StreamingService::new(
            Arc::clone(&frame_store),
            Arc::clone(&locks),
        ));
        let coordinator = Arc::new(DegradeCoordinator::new(
            Arc::clone(&frame_store),
            Arc::clone(&metadata),
            locks,
            config.degradation_rate,
        ));
        Self {
            config,
            frame_store,
            metadata,
            streaming,
            coordinator,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/tracks", get(list_tracks))
        .route("/stream/:filename", get(stream_track))
        .route("/stream/:filename/chunk/:index", get(stream_chunk))
        .route("/degrade/:filename", post(degrade_segment))
        .route("/stats/:filename", get(track_stats))
        .route("/waveform/:filename", get(track_waveform))
        .with_state(state)
}

/// JSON error payload plus the status it maps to.
enum ApiError {
    Store(StoreError),
    BadRequest(&'static str),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match self {
            ApiError::BadRequest(reason) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": reason })))
                    .into_response()
            }
            ApiError::Store(e) => e,
        };
        let status = match &error {
            StoreError::TrackNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::SegmentOutOfRange { .. } => StatusCode::BAD_REQUEST,
            StoreError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            StoreError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::InconsistentMetadata { .. } => StatusCode::CONFLICT,
            StoreError::Format(_) | StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("request failed: {}", error);
        }
        let mut response = (status, Json(json!({ "error": error.to_string() }))).into_response();
        if let StoreError::RangeNotSatisfiable { len, .. } = error {
            if let Ok(value) = format!("bytes */{}", len).parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}

/// Run a blocking store call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Store(StoreError::Io(std::io::Error::other(e))))?
        .map_err(ApiError::from)
}

#[derive(Serialize)]
struct StatusResponse {
    name: &'static str,
    version: &'static str,
    tracks: usize,
    segment_duration: f64,
    degradation_rate: f64,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let metadata = Arc::clone(&state.metadata);
    let tracks = blocking(move || metadata.list_tracks()).await?;
    Ok(Json(StatusResponse {
        name: "ephemera",
        version: env!("CARGO_PKG_VERSION"),
        tracks: tracks.len(),
        segment_duration: state.config.segment_duration,
        degradation_rate: state.config.degradation_rate,
    }))
}

#[derive(Serialize)]
struct TrackSummary {
    filename: String,
    title: String,
    duration_seconds: f64,
    segment_count: usize,
    total_chunks: usize,
    total_plays: u64,
    total_streams: u64,
    average_degradation: f64,
}

fn summarize(record: &TrackRecord, rate: f64) -> TrackSummary {
    TrackSummary {
        filename: record.filename.clone(),
        title: record.title.clone(),
        duration_seconds: record.duration_seconds,
        segment_count: record.segment_count(),
        total_chunks: (record.duration_seconds / CHUNK_DURATION).ceil().max(1.0) as usize,
        total_plays: record.total_plays(),
        total_streams: record.total_streams,
        average_degradation: record.average_degradation(rate),
    }
}

async fn list_tracks(State(state): State<AppState>) -> Result<Json<Vec<TrackSummary>>, ApiError> {
    let metadata = Arc::clone(&state.metadata);
    let records = blocking(move || metadata.list_tracks()).await?;
    let rate = state.config.degradation_rate;
    Ok(Json(records.iter().map(|r| summarize(r, rate)).collect()))
}

/// Serve track bytes, honoring a single `Range: bytes=...` span.
///
/// A full (non-range) response counts as one stream; range requests are the
/// player refilling its buffer and are not counted.
async fn stream_track(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);

    let streaming = Arc::clone(&state.streaming);
    let metadata = Arc::clone(&state.metadata);
    let track = filename.clone();
    let (read, partial) = blocking(move || {
        let read = match range {
            Some(RangeSpec::FromTo(start, end)) => streaming.read_range(&track, start, end)?,
            Some(RangeSpec::Suffix(count)) => {
                let total = streaming.file_len(&track)?;
                streaming.read_range(&track, total.saturating_sub(count), None)?
            }
            None => {
                let read = streaming.read_full(&track)?;
                metadata.increment_total_streams(&track)?;
                read
            }
        };
        Ok((read, range.is_some()))
    })
    .await?;

    let status = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, read.bytes.len())
        // Every response reflects a state of the audio that no longer exists
        .header(header::CACHE_CONTROL, "no-cache");
    if partial {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", read.start, read.end, read.total_len),
        );
    }
    builder
        .body(Body::from(read.bytes))
        .map_err(|e| ApiError::Store(StoreError::Io(std::io::Error::other(e))))
}

/// One segment-sized span of a track as a standalone playable WAV.
async fn stream_chunk(
    State(state): State<AppState>,
    Path((filename, index)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    let streaming = Arc::clone(&state.streaming);
    let bytes =
        blocking(move || streaming.read_chunk_wav(&filename, index, CHUNK_DURATION)).await?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Store(StoreError::Io(std::io::Error::other(e))))
}

#[derive(Serialize)]
struct DegradeResponse {
    filename: String,
    segment_index: usize,
    play_count: u64,
    degradation_level: f64,
}

async fn degrade_segment(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Result<Json<DegradeResponse>, ApiError> {
    // The body is parsed leniently so a missing or malformed index is the
    // caller's 400, not an extractor rejection
    let segment_index = body
        .and_then(|Json(v)| v.get("segment_index").and_then(|i| i.as_u64()))
        .ok_or(ApiError::BadRequest("segment_index required"))? as usize;

    let coordinator = Arc::clone(&state.coordinator);
    let track = filename.clone();
    let outcome = blocking(move || coordinator.degrade(&track, segment_index)).await?;
    Ok(Json(DegradeResponse {
        filename,
        segment_index: outcome.segment_index,
        play_count: outcome.play_count,
        degradation_level: outcome.degradation_level,
    }))
}

#[derive(Serialize)]
struct SegmentStats {
    index: usize,
    play_count: u64,
    degradation_level: f64,
    last_played: Option<String>,
}

#[derive(Serialize)]
struct TrackStats {
    #[serde(flatten)]
    summary: TrackSummary,
    sample_rate: u32,
    total_frames: u64,
    segment_states: Vec<SegmentStats>,
}

async fn track_stats(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<TrackStats>, ApiError> {
    let metadata = Arc::clone(&state.metadata);
    let record = blocking(move || metadata.get(&filename)).await?;
    let rate = state.config.degradation_rate;
    Ok(Json(TrackStats {
        summary: summarize(&record, rate),
        sample_rate: record.sample_rate,
        total_frames: record.total_frames,
        segment_states: record
            .segments
            .iter()
            .map(|s| SegmentStats {
                index: s.index,
                play_count: s.play_count,
                degradation_level: ephemera_core::degrade::dropout_probability(s.play_count, rate)
                    * 100.0,
                last_played: s.last_played.map(|t| t.to_rfc3339()),
            })
            .collect(),
    }))
}

async fn track_waveform(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<Vec<waveform::WaveformPoint>>, ApiError> {
    let frame_store = Arc::clone(&state.frame_store);
    let metadata_dir = state.config.metadata_dir.clone();
    let points =
        blocking(move || waveform::load_or_generate(&frame_store, &metadata_dir, &filename))
            .await?;
    Ok(Json(points))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeSpec {
    /// `bytes=a-` or `bytes=a-b` (inclusive end).
    FromTo(u64, Option<u64>),
    /// `bytes=-n`: the final n bytes.
    Suffix(u64),
}

/// Parse a single-span `Range` header. Multi-span and malformed headers are
/// ignored, which downgrades the request to a full response.
fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let spans = value.strip_prefix("bytes=")?;
    if spans.contains(',') {
        return None;
    }
    let (start, end) = spans.split_once('-')?;
    let start = start.trim();
    let end = end.trim();
    if start.is_empty() {
        return Some(RangeSpec::Suffix(end.parse().ok()?));
    }
    let start: u64 = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some(RangeSpec::FromTo(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(dir: &TempDir) -> AppState {
        let audio_dir = dir.path().join("audio");
        std::fs::create_dir_all(&audio_dir).unwrap();

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(audio_dir.join("song.wav"), spec).unwrap();
        for i in 0..10_000u32 {
            writer.write_sample(((i % 700) + 1) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let config = StoreConfig {
            audio_dir,
            metadata_dir: dir.path().join("metadata"),
            segment_duration: 0.5,
            degradation_rate: 1.0,
            lock_timeout: Duration::from_secs(2),
        };
        let state = AppState::new(config);
        state.metadata.scan_and_initialize().unwrap();
        state
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>, HeaderMap) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec(), headers)
    }

    #[tokio::test]
    async fn test_status_reports_track_count() {
        let dir = TempDir::new().unwrap();
        let router = build_router(test_state(&dir));
        let (status, body, _) = send(
            router,
            Request::get("/").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["tracks"], 1);
        assert_eq!(json["name"], "ephemera");
    }

    #[tokio::test]
    async fn test_tracks_summaries_use_documented_keys() {
        let dir = TempDir::new().unwrap();
        let router = build_router(test_state(&dir));
        let (status, body, _) = send(
            router,
            Request::get("/tracks").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["filename"], "song.wav");
        assert_eq!(json[0]["segment_count"], 3);
        assert_eq!(json[0]["total_plays"], 0);
        assert_eq!(json[0]["total_streams"], 0);
        assert_eq!(json[0]["average_degradation"], 0.0);
    }

    #[tokio::test]
    async fn test_range_request_returns_exact_span() {
        let dir = TempDir::new().unwrap();
        let router = build_router(test_state(&dir));
        let (status, body, headers) = send(
            router,
            Request::get("/stream/song.wav")
                .header(header::RANGE, "bytes=0-99")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(body.len(), 100);
        assert_eq!(&body[0..4], b"RIFF");
        let content_range = headers[header::CONTENT_RANGE].to_str().unwrap();
        assert!(content_range.starts_with("bytes 0-99/"));
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    }

    #[tokio::test]
    async fn test_full_stream_counts_one_stream() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let router = build_router(state.clone());
        let (status, body, headers) = send(
            router.clone(),
            Request::get("/stream/song.wav").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        let on_disk = std::fs::read(dir.path().join("audio/song.wav")).unwrap();
        assert_eq!(body, on_disk);
        assert_eq!(state.metadata.get("song.wav").unwrap().total_streams, 1);

        // A ranged refill is not another stream
        let (status, _, _) = send(
            router,
            Request::get("/stream/song.wav")
                .header(header::RANGE, "bytes=100-199")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(state.metadata.get("song.wav").unwrap().total_streams, 1);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_is_416() {
        let dir = TempDir::new().unwrap();
        let router = build_router(test_state(&dir));
        let (status, _, headers) = send(
            router,
            Request::get("/stream/song.wav")
                .header(header::RANGE, "bytes=99999999-")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert!(headers[header::CONTENT_RANGE]
            .to_str()
            .unwrap()
            .starts_with("bytes */"));
    }

    #[tokio::test]
    async fn test_unknown_track_is_404() {
        let dir = TempDir::new().unwrap();
        let router = build_router(test_state(&dir));
        let (status, _, _) = send(
            router,
            Request::get("/stream/ghost.wav").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_degrade_endpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let router = build_router(state.clone());
        let (status, body, _) = send(
            router.clone(),
            Request::post("/degrade/song.wav")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"segment_index":0}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["play_count"], 1);
        assert_eq!(json["segment_index"], 0);

        // Out-of-bounds index is the caller's mistake
        let (status, _, _) = send(
            router,
            Request::post("/degrade/song.wav")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"segment_index":42}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_degrade_without_segment_index_is_400() {
        let dir = TempDir::new().unwrap();
        let router = build_router(test_state(&dir));

        // Body present but the index is missing
        let (status, body, _) = send(
            router.clone(),
            Request::post("/degrade/song.wav")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "segment_index required");

        // No body at all
        let (status, _, _) = send(
            router,
            Request::post("/degrade/song.wav").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_reflect_degrades() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let router = build_router(state.clone());
        state.coordinator.degrade("song.wav", 1).unwrap();

        let (status, body, _) = send(
            router,
            Request::get("/stats/song.wav").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["total_plays"], 1);
        assert_eq!(json["segment_states"][1]["play_count"], 1);
        assert_eq!(json["segment_states"][0]["play_count"], 0);
        assert!(json["segment_states"][1]["last_played"].is_string());
    }

    #[tokio::test]
    async fn test_chunk_is_standalone_wav() {
        let dir = TempDir::new().unwrap();
        let router = build_router(test_state(&dir));
        // 10_000 frames at 8kHz is 1.25s: exactly one 5s chunk
        let (status, body, headers) = send(
            router.clone(),
            Request::get("/stream/song.wav/chunk/0")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "audio/wav");
        assert_eq!(&body[0..4], b"RIFF");
        assert_eq!(&body[8..12], b"WAVE");

        let (status, _, _) = send(
            router,
            Request::get("/stream/song.wav/chunk/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_waveform_endpoint_returns_points() {
        let dir = TempDir::new().unwrap();
        let router = build_router(test_state(&dir));
        let (status, body, _) = send(
            router,
            Request::get("/waveform/song.wav").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let points: Vec<waveform::WaveformPoint> = serde_json::from_slice(&body).unwrap();
        assert_eq!(points.len(), waveform::DEFAULT_POINTS);
        assert!(points.iter().all(|p| p.min >= -1.0 && p.max <= 1.0));
    }

    #[test]
    fn test_parse_range_header() {
        assert_eq!(
            parse_range_header("bytes=0-99"),
            Some(RangeSpec::FromTo(0, Some(99)))
        );
        assert_eq!(
            parse_range_header("bytes=100-"),
            Some(RangeSpec::FromTo(100, None))
        );
        assert_eq!(parse_range_header("bytes=-500"), Some(RangeSpec::Suffix(500)));
        assert_eq!(parse_range_header("bytes=0-99,200-299"), None);
        assert_eq!(parse_range_header("frames=0-99"), None);
        assert_eq!(parse_range_header("bytes=abc-"), None);
    }
}
