//! HTTP surface: request validation and response shaping over [`RateService`].

pub mod error;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::core::currency::{CurrencyCode, RateSource};
use crate::core::resolver::parse_request;
use crate::service::RateService;
pub use error::{ApiError, ApiResult};

/// Reference-table answers never change while the process runs.
pub const CACHE_STATIC: &str = "public, max-age=3600";
pub const CACHE_LIVE: &str = "public, max-age=600, stale-while-revalidate=1200";
pub const CACHE_FALLBACK: &str = "public, max-age=60";

pub const FALLBACK_WARNING: &str =
    "Live exchange rates are unavailable; approximate reference rates returned";

pub fn app_router(service: Arc<RateService>) -> Router {
    Router::new()
        .route("/exchange-rates", get(get_exchange_rates))
        .route("/currencies", get(list_currencies))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Default, Deserialize)]
pub struct RatesQuery {
    pub base: Option<String>,
    /// Comma separated codes.
    pub targets: Option<String>,
}

impl RatesQuery {
    fn target_list(&self) -> Vec<&str> {
        self.targets
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct RatesResponse {
    pub base: CurrencyCode,
    pub rates: BTreeMap<CurrencyCode, f64>,
    pub date: String,
    /// `api` when any rate is live, `mock` when all come from the reference table.
    pub source: &'static str,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub estimated: BTreeSet<CurrencyCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

fn format_date(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn get_exchange_rates(
    State(service): State<Arc<RateService>>,
    Query(query): Query<RatesQuery>,
) -> ApiResult<Response> {
    let base = query
        .base
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(service.default_base().as_str());
    let (base, targets) = parse_request(base, &query.target_list())?;

    if targets.is_empty() {
        debug!(%base, "Serving reference table");
        let body = RatesResponse {
            rates: service.resolver().reference().rates_for(&base),
            base,
            date: format_date(Utc::now()),
            source: "mock",
            estimated: BTreeSet::new(),
            warning: None,
        };
        return Ok(([(header::CACHE_CONTROL, CACHE_STATIC)], Json(body)).into_response());
    }

    let snapshot = service.rates_for(&base, &targets).await?;
    let (source, cache_control, warning) = match snapshot.source {
        RateSource::Live => ("api", CACHE_LIVE, None),
        RateSource::Partial => ("api", CACHE_FALLBACK, None),
        RateSource::Mock => ("mock", CACHE_FALLBACK, Some(FALLBACK_WARNING.to_string())),
    };
    let body = RatesResponse {
        base: snapshot.base,
        rates: snapshot.rates,
        date: format_date(snapshot.fetched_at),
        source,
        estimated: snapshot.estimated,
        warning,
    };
    Ok(([(header::CACHE_CONTROL, cache_control)], Json(body)).into_response())
}

#[derive(Debug, Serialize)]
pub struct CurrencyInfo {
    pub code: CurrencyCode,
    pub name: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CurrenciesResponse {
    pub pivot: CurrencyCode,
    pub currencies: Vec<CurrencyInfo>,
}

async fn list_currencies(State(service): State<Arc<RateService>>) -> Response {
    let reference = service.resolver().reference();
    let body = CurrenciesResponse {
        pivot: reference.pivot().clone(),
        currencies: reference
            .names()
            .map(|(code, name)| CurrencyInfo {
                code: code.clone(),
                name,
            })
            .collect(),
    };
    ([(header::CACHE_CONTROL, CACHE_STATIC)], Json(body)).into_response()
}
