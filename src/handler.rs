//! Request decision orchestration
//!
//! One pass per request:
//!
//! ```text
//! admission ── rejected ──────────────────────────────► Skipped
//!     │
//!     ▼
//! resolve provider ─► current version ─► compare candidate ── match ──► NotModified (304)
//!                                              │
//!                                              └── no match ─► ETag + Cache-Control ─► Tagged
//! ```
//!
//! The response head is only written once a decision has been reached, so a
//! failure or cancellation leaves it exactly as it was.

use http::header::{CACHE_CONTROL, ETAG};
use http::{HeaderValue, StatusCode};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::admission;
use crate::aggregate;
use crate::context::{RequestContext, ResponseHead};
use crate::error::{ConfigError, Result, SourceError, TrackerError};
use crate::metrics::{DecisionTimer, Metrics};
use crate::options::TrackOptions;
use crate::resolver::ProviderResolver;
use crate::source::SourceProvider;
use crate::tag::TagCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Status set to 304; the body should not be produced.
    NotModified,
    /// Fresh tag attached; processing continues.
    Tagged,
    /// Not eligible; the response was left untouched.
    Skipped,
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::NotModified => f.write_str("not_modified"),
            RequestOutcome::Tagged => f.write_str("tagged"),
            RequestOutcome::Skipped => f.write_str("skipped"),
        }
    }
}

pub struct RequestHandler {
    codec: TagCodec,
    resolver: ProviderResolver,
    metrics: Option<Arc<Metrics>>,
}

impl RequestHandler {
    pub fn new(codec: TagCodec, resolver: ProviderResolver) -> Self {
        Self {
            codec,
            resolver,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn codec(&self) -> &TagCodec {
        &self.codec
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Decides the request and writes the result into `response`.
    ///
    /// Configuration, source and cancellation errors are returned without
    /// touching `response`.
    pub async fn handle(
        &self,
        ctx: &RequestContext<'_>,
        response: &mut ResponseHead,
        options: &TrackOptions,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome> {
        let timer = self.metrics.as_deref().map(DecisionTimer::new);

        let result = self.decide(ctx, response, options, cancel).await;

        match &result {
            Ok(outcome) => {
                if let Some(timer) = timer {
                    timer.finish(*outcome);
                }
            }
            Err(e) => {
                if e.is_cancelled() {
                    tracing::debug!(trace_id = %ctx.trace_id, path = ctx.path(), "Request cancelled");
                } else {
                    tracing::error!(
                        trace_id = %ctx.trace_id,
                        path = ctx.path(),
                        error = %e,
                        "Failed to decide request"
                    );
                }
                if let Some(timer) = timer {
                    timer.fail(e.is_cancelled());
                }
            }
        }

        result
    }

    async fn decide(
        &self,
        ctx: &RequestContext<'_>,
        response: &mut ResponseHead,
        options: &TrackOptions,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome> {
        if cancel.is_cancelled() {
            return Err(TrackerError::Cancelled);
        }

        if !admission::is_eligible(ctx, response, options) {
            return Ok(RequestOutcome::Skipped);
        }

        let lease = self.resolver.resolve(ctx, options)?;
        let version = current_version(lease.provider(), options, cancel).await?;
        let suffix = options.suffix_for(ctx);

        if let Some(candidate) = ctx.candidate_tag() {
            if self.codec.compare(candidate, version, &suffix) {
                response.status = StatusCode::NOT_MODIFIED;
                tracing::debug!(
                    trace_id = %ctx.trace_id,
                    path = ctx.path(),
                    etag = candidate,
                    "Not modified"
                );
                return Ok(RequestOutcome::NotModified);
            }
        }

        let tag = self.codec.generate(version, &suffix);
        let value = HeaderValue::from_str(&tag).map_err(|_| ConfigError::InvalidHeader(tag.clone()))?;
        response.headers.insert(ETAG, value);
        response
            .headers
            .insert(CACHE_CONTROL, options.cache_control().clone());

        tracing::debug!(trace_id = %ctx.trace_id, path = ctx.path(), etag = %tag, "Tag added");
        Ok(RequestOutcome::Tagged)
    }
}

/// Current version for the configured keys: the whole source for none, the
/// raw key version for one, the fold of all of them for more.
async fn current_version(
    provider: &dyn SourceProvider,
    options: &TrackOptions,
    cancel: &CancellationToken,
) -> Result<u64> {
    let lookup = async {
        match options.keys().as_slice() {
            [] => provider.source_version(cancel).await.map(aggregate::reinterpret),
            [key] => provider.version_of(key, cancel).await.map(aggregate::reinterpret),
            keys => provider
                .versions_of(keys, cancel)
                .await
                .map(|versions| aggregate::fold(&versions)),
        }
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TrackerError::Cancelled),
        result = lookup => result,
    };

    result.map_err(|e| match e {
        SourceError::Cancelled => TrackerError::Cancelled,
        other => TrackerError::Source(other),
    })
}
