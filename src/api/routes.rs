use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::health::{RagStatus, UpstreamHealth};
use crate::api::latency::{LatencySummary, UpstreamLatency};
use crate::batch_scanner::{BatchScanner, ScanMetrics, ScanOutcome};
use crate::config::TOTAL_BATCHES;
use crate::error::{AppError, Result};
use crate::fetcher::{CircuitState, MarketDataClient};
use crate::state::{CacheSnapshot, DataQuality, SnapshotMetadata};
use crate::types::{MarketSegment, Opportunity, OpportunityCategory, Strategy};

#[derive(Clone)]
pub struct ApiState {
    pub scanner: Arc<BatchScanner>,
    pub upstream: Arc<UpstreamHealth>,
    pub latency: Arc<UpstreamLatency>,
    /// Source of the circuit state; `None` when scanning against something other than the
    /// production client.
    pub client: Option<Arc<MarketDataClient>>,
    pub stale_after: Duration,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/opportunities/:segment", get(get_snapshot))
        .route("/opportunities/:segment/categories/:category", get(get_category))
        .route("/opportunities/:segment/strategies/:strategy", get(get_strategy))
        .route("/opportunities/:segment/trending", get(get_trending))
        .route("/scan/:segment", post(post_scan))
        .route("/scan-all", post(post_scan_all))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ScanQuery {
    pub batch: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct BucketResponse {
    pub segment: MarketSegment,
    pub bucket: String,
    pub last_scan: DateTime<Utc>,
    pub data_quality: DataQuality,
    pub opportunities: Vec<Opportunity>,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub segment: MarketSegment,
    pub batch: usize,
    /// True when the segment was already scanning and nothing new was fetched.
    pub noop: bool,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize)]
pub struct UpstreamStatus {
    pub live_calls: u64,
    pub synthetic_fallbacks: u64,
    pub rate_limited: u64,
    pub circuit_trips: u64,
    pub circuit_state: Option<CircuitState>,
}

#[derive(Debug, Serialize)]
pub struct SegmentHealth {
    pub segment: MarketSegment,
    pub status: RagStatus,
    pub scanning: bool,
    pub last_scan: Option<DateTime<Utc>>,
    pub age_secs: Option<u64>,
    pub stale: bool,
    pub data_quality: Option<DataQuality>,
    pub total_opportunities: usize,
    pub last_metrics: Option<ScanMetrics>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Worst segment status.
    pub status: RagStatus,
    pub upstream: UpstreamStatus,
    pub segments: Vec<SegmentHealth>,
}

// ---------------------------------------------------------------------------
// Path parsing
// ---------------------------------------------------------------------------

fn parse_segment(raw: &str) -> Result<MarketSegment> {
    raw.parse::<MarketSegment>().map_err(AppError::BadRequest)
}

fn parse_category(raw: &str) -> Result<OpportunityCategory> {
    raw.parse::<OpportunityCategory>().map_err(AppError::BadRequest)
}

fn parse_strategy(raw: &str) -> Result<Strategy> {
    match raw.to_ascii_lowercase().as_str() {
        "csp" | "cash-secured-put" => Ok(Strategy::CashSecuredPut),
        "cc" | "covered-call" => Ok(Strategy::CoveredCall),
        other => Err(AppError::BadRequest(format!("unknown strategy '{other}'"))),
    }
}

fn bucket(snapshot: &CacheSnapshot, name: String, opportunities: &[Opportunity]) -> BucketResponse {
    BucketResponse {
        segment: snapshot.segment,
        bucket: name,
        last_scan: snapshot.metadata.last_scan,
        data_quality: snapshot.metadata.data_quality,
        opportunities: opportunities.to_vec(),
    }
}

fn scan_response(outcome: &ScanOutcome) -> ScanResponse {
    let snap = outcome.snapshot();
    ScanResponse {
        segment: snap.segment,
        batch: snap.metadata.batch,
        noop: outcome.was_noop(),
        metadata: snap.metadata.clone(),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_snapshot(
    State(state): State<ApiState>,
    Path(segment): Path<String>,
) -> Result<Json<Arc<CacheSnapshot>>> {
    let segment = parse_segment(&segment)?;
    Ok(Json(state.scanner.store().get_or_empty(segment)))
}

async fn get_category(
    State(state): State<ApiState>,
    Path((segment, category)): Path<(String, String)>,
) -> Result<Json<BucketResponse>> {
    let segment = parse_segment(&segment)?;
    let category = parse_category(&category)?;
    let snap = state.scanner.store().get_or_empty(segment);
    Ok(Json(bucket(&snap, category.to_string(), snap.categorized.get(category))))
}

async fn get_strategy(
    State(state): State<ApiState>,
    Path((segment, strategy)): Path<(String, String)>,
) -> Result<Json<BucketResponse>> {
    let segment = parse_segment(&segment)?;
    let strategy = parse_strategy(&strategy)?;
    let snap = state.scanner.store().get_or_empty(segment);
    Ok(Json(bucket(&snap, strategy.to_string(), snap.by_strategy.get(strategy))))
}

async fn get_trending(
    State(state): State<ApiState>,
    Path(segment): Path<String>,
) -> Result<Json<BucketResponse>> {
    let segment = parse_segment(&segment)?;
    let snap = state.scanner.store().get_or_empty(segment);
    Ok(Json(bucket(&snap, "trending".to_string(), &snap.trending)))
}

async fn post_scan(
    State(state): State<ApiState>,
    Path(segment): Path<String>,
    Query(params): Query<ScanQuery>,
) -> Result<Json<ScanResponse>> {
    let segment = parse_segment(&segment)?;
    let outcome = state
        .scanner
        .scan_batch(segment, params.batch.unwrap_or(1))
        .await?;
    Ok(Json(scan_response(&outcome)))
}

async fn post_scan_all(
    State(state): State<ApiState>,
    Query(params): Query<ScanQuery>,
) -> Result<Json<Vec<ScanResponse>>> {
    let batch = params.batch.unwrap_or(1);
    if !(1..=TOTAL_BATCHES).contains(&batch) {
        return Err(AppError::InvalidBatch { batch, total_batches: TOTAL_BATCHES });
    }
    let results = state.scanner.scan_all(batch).await;
    let responses = results
        .into_iter()
        .map(|(_, outcome)| outcome.map(|o| scan_response(&o)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(responses))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let store = state.scanner.store();
    let segments: Vec<SegmentHealth> = MarketSegment::ALL
        .iter()
        .map(|&segment| {
            let snap = store.get(segment);
            let snap = snap.as_deref();
            SegmentHealth {
                segment,
                status: RagStatus::for_snapshot(snap, state.stale_after),
                scanning: state.scanner.is_scanning(segment),
                last_scan: snap.map(|s| s.metadata.last_scan),
                age_secs: snap.map(|s| s.age().as_secs()),
                stale: snap.map_or(true, |s| s.is_stale(state.stale_after)),
                data_quality: snap.map(|s| s.metadata.data_quality),
                total_opportunities: snap.map_or(0, |s| s.metadata.total_opportunities),
                last_metrics: state.scanner.last_metrics(segment),
            }
        })
        .collect();

    let status = if segments.iter().any(|s| s.status == RagStatus::Red) {
        RagStatus::Red
    } else if segments.iter().any(|s| s.status == RagStatus::Amber) {
        RagStatus::Amber
    } else {
        RagStatus::Green
    };

    Json(HealthResponse {
        status,
        upstream: UpstreamStatus {
            live_calls: state.upstream.live_calls(),
            synthetic_fallbacks: state.upstream.synthetic_fallbacks(),
            rate_limited: state.upstream.rate_limited(),
            circuit_trips: state.upstream.circuit_trips(),
            circuit_state: state.client.as_ref().map(|c| c.circuit_state()),
        },
        segments,
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::TrendDetector;
    use crate::fetcher::{MarketDataSource, Sourced};
    use crate::scorer::OpportunityConverter;
    use crate::state::CacheStore;
    use crate::types::{ContractType, OptionQuote};
    use crate::universe::TickerUniverse;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct TwoTickers;

    #[async_trait]
    impl TickerUniverse for TwoTickers {
        async fn tickers(&self, _segment: MarketSegment) -> Vec<String> {
            vec!["AAA".to_string(), "BBB".to_string()]
        }
    }

    struct OnePut;

    #[async_trait]
    impl MarketDataSource for OnePut {
        async fn underlying_price(&self, _symbol: &str) -> Result<Sourced<f64>> {
            Ok(Sourced::live(100.0))
        }

        async fn options_chain(&self, symbol: &str) -> Result<Sourced<Vec<OptionQuote>>> {
            Ok(Sourced::live(vec![OptionQuote {
                contract_id: format!("O:{symbol}P95"),
                underlying: symbol.to_string(),
                strike: 95.0,
                expiration: Utc::now().date_naive() + chrono::Duration::days(21),
                contract_type: ContractType::Put,
                bid: 1.0,
                ask: 1.2,
                last_trade: None,
                volume: 500,
                open_interest: 1000,
                implied_volatility: Some(0.4),
                greeks: None,
            }]))
        }
    }

    fn state() -> ApiState {
        let scanner = BatchScanner::new(
            Arc::new(OnePut),
            Arc::new(TwoTickers),
            OpportunityConverter::new(10),
            Arc::new(TrendDetector::new()),
            Arc::new(CacheStore::new()),
            CancellationToken::new(),
        );
        ApiState {
            scanner: Arc::new(scanner),
            upstream: Arc::new(UpstreamHealth::new()),
            latency: Arc::new(UpstreamLatency::new()),
            client: None,
            stale_after: Duration::from_secs(900),
        }
    }

    #[test]
    fn strategy_aliases() {
        assert_eq!(parse_strategy("csp").unwrap(), Strategy::CashSecuredPut);
        assert_eq!(parse_strategy("Covered-Call").unwrap(), Strategy::CoveredCall);
        assert!(matches!(parse_strategy("iron-condor"), Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn never_scanned_segment_returns_empty_snapshot() {
        let Json(snap) = get_snapshot(State(state()), Path("index".to_string())).await.unwrap();
        assert!(snap.opportunities.is_empty());
        assert_eq!(snap.metadata.data_quality, DataQuality::Empty);
    }

    #[tokio::test]
    async fn unknown_segment_is_bad_request() {
        let err = get_snapshot(State(state()), Path("crypto".to_string())).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn scan_then_read_buckets() {
        let st = state();
        let Json(resp) = post_scan(
            State(st.clone()),
            Path("equity".to_string()),
            Query(ScanQuery { batch: Some(1) }),
        )
        .await
        .unwrap();
        assert!(!resp.noop);
        assert_eq!(resp.batch, 1);
        assert_eq!(resp.metadata.tickers_scanned, vec!["AAA"]);

        let Json(movers) = get_category(
            State(st.clone()),
            Path(("equity".to_string(), "market-movers".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(movers.opportunities.len(), 1);
        assert_eq!(movers.bucket, "market-movers");

        let Json(csp) = get_strategy(State(st.clone()), Path(("equity".to_string(), "csp".to_string())))
            .await
            .unwrap();
        assert_eq!(csp.opportunities.len(), 1);

        let Json(trending) = get_trending(State(st), Path("equity".to_string())).await.unwrap();
        assert!(trending.opportunities.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_batch_is_rejected() {
        let err = post_scan_all(State(state()), Query(ScanQuery { batch: Some(9) }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidBatch { batch: 9, .. }));
    }

    #[tokio::test]
    async fn scan_all_then_health_is_green() {
        let st = state();
        let Json(all) = post_scan_all(State(st.clone()), Query(ScanQuery { batch: Some(1) }))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let Json(health) = get_health(State(st)).await;
        assert_eq!(health.status, RagStatus::Green);
        assert!(health.upstream.circuit_state.is_none());
        for seg in &health.segments {
            assert_eq!(seg.status, RagStatus::Green);
            assert_eq!(seg.data_quality, Some(DataQuality::Live));
            assert_eq!(seg.last_metrics.as_ref().unwrap().tickers_attempted, 1);
        }
    }

    #[tokio::test]
    async fn health_is_red_before_any_scan() {
        let Json(health) = get_health(State(state())).await;
        assert_eq!(health.status, RagStatus::Red);
        assert!(health.segments.iter().all(|s| s.last_scan.is_none() && s.stale));
    }
}
