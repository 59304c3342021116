//! HTTP handlers for the webmention endpoint.

use std::sync::Arc;

use axum::extract::{FromRequest, Query, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use backfeed_core::{InboundOutcome, Webmentions};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::views::{AcceptedResponse, HealthResponse, MentionView, StatsView};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub webmentions: Arc<Webmentions>,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// `source`/`target` pair, from a form or JSON body.
///
/// Missing fields are left empty so the pipeline reports them.
#[derive(Debug, Default, Deserialize)]
pub struct MentionRequest {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

impl<S: Send + Sync> FromRequest<S> for MentionRequest {
    type Rejection = ApiError;

    async fn from_request(mut req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        if content_type.is_none() {
            // Senders that omit the header get the standard form encoding.
            req.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
        }

        if content_type.is_some_and(|ct| ct.starts_with("application/json")) {
            let Json(body) = Json::<MentionRequest>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            Ok(body)
        } else {
            let Form(body) = Form::<MentionRequest>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            Ok(body)
        }
    }
}

/// Query string for `GET` on the endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub post_id: Option<String>,
    pub stats: Option<String>,
}

impl ListParams {
    fn wants_stats(&self) -> bool {
        self.stats
            .as_deref()
            .is_some_and(|v| !matches!(v, "" | "0" | "false"))
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "backfeed",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Receive a webmention. `202` once verified and stored, `400` with a reason otherwise.
pub async fn receive(
    State(state): State<AppState>,
    body: MentionRequest,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    let source = body.source.unwrap_or_default();
    let target = body.target.unwrap_or_default();

    match state.webmentions.process_inbound(&source, &target).await? {
        InboundOutcome::Accepted { id, .. } => Ok((
            StatusCode::ACCEPTED,
            Json(AcceptedResponse {
                success: true,
                id: id.to_string(),
            }),
        )),
        InboundOutcome::Rejected(reason) => Err(reason.into()),
    }
}

/// `?postId=<id>` lists a post's mentions, `?stats=1` returns aggregates.
pub async fn query(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Response> {
    if let Some(post_id) = params.post_id.as_deref().filter(|id| !id.is_empty()) {
        debug!(%post_id, "listing mentions");
        let mentions: Vec<MentionView> = state
            .webmentions
            .mentions_for_post(post_id)
            .await?
            .into_iter()
            .map(MentionView::from)
            .collect();
        return Ok(Json(mentions).into_response());
    }

    if params.wants_stats() {
        let stats = StatsView::from(state.webmentions.stats().await?);
        return Ok(Json(stats).into_response());
    }

    Err(ApiError::BadRequest(
        "Expected postId or stats query parameter".into(),
    ))
}
