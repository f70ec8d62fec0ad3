//! Admission filter
//!
//! Decides whether a request takes part in conditional caching at all. The
//! check only reads headers; it does no I/O and keeps no state.

use http::header::{CACHE_CONTROL, ETAG};
use http::{HeaderMap, Method};
use std::fmt;

use crate::context::{RequestContext, ResponseHead};
use crate::options::TrackOptions;

/// Why a request was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotGet(Method),
    AlreadyTagged,
    RequestDirective(String),
    ResponseDirective(String),
    CustomFilter,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotGet(method) => write!(f, "method {} is not GET", method),
            Rejection::AlreadyTagged => f.write_str("response already has an ETag"),
            Rejection::RequestDirective(d) => {
                write!(f, "request Cache-Control contains '{}'", d)
            }
            Rejection::ResponseDirective(d) => {
                write!(f, "response Cache-Control contains '{}'", d)
            }
            Rejection::CustomFilter => f.write_str("custom filter returned false"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub eligible: bool,
    pub reason: Option<Rejection>,
}

impl AdmissionDecision {
    pub fn admit() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }

    pub fn reject(reason: Rejection) -> Self {
        Self {
            eligible: false,
            reason: Some(reason),
        }
    }
}

/// Evaluates the admission rules in order; the first failing rule decides.
pub fn evaluate(
    ctx: &RequestContext<'_>,
    response: &ResponseHead,
    options: &TrackOptions,
) -> AdmissionDecision {
    let decision = check(ctx, response, options);

    match &decision.reason {
        None => tracing::debug!(trace_id = %ctx.trace_id, path = ctx.path(), "Request admitted"),
        Some(reason) => tracing::debug!(
            trace_id = %ctx.trace_id,
            path = ctx.path(),
            reason = %reason,
            "Request rejected"
        ),
    }

    decision
}

pub fn is_eligible(ctx: &RequestContext<'_>, response: &ResponseHead, options: &TrackOptions) -> bool {
    evaluate(ctx, response, options).eligible
}

fn check(ctx: &RequestContext<'_>, response: &ResponseHead, options: &TrackOptions) -> AdmissionDecision {
    if *ctx.method != Method::GET {
        return AdmissionDecision::reject(Rejection::NotGet(ctx.method.clone()));
    }

    if response.headers.contains_key(ETAG) {
        return AdmissionDecision::reject(Rejection::AlreadyTagged);
    }

    if let Some(directive) = find_directive(ctx.headers, options.invalid_request_directives()) {
        return AdmissionDecision::reject(Rejection::RequestDirective(directive.to_string()));
    }

    if let Some(directive) =
        find_directive(&response.headers, options.invalid_response_directives())
    {
        return AdmissionDecision::reject(Rejection::ResponseDirective(directive.to_string()));
    }

    if !options.passes_filter(ctx) {
        return AdmissionDecision::reject(Rejection::CustomFilter);
    }

    AdmissionDecision::admit()
}

/// First blacklisted directive found in any `Cache-Control` occurrence.
///
/// `blacklist` entries are lowercase; header values are matched
/// case-insensitively by substring, one comma-separated value at a time.
fn find_directive<'a>(headers: &HeaderMap, blacklist: &'a [String]) -> Option<&'a str> {
    if blacklist.is_empty() {
        return None;
    }

    for value in headers.get_all(CACHE_CONTROL) {
        for part in value.as_bytes().split(|&b| b == b',') {
            if let Some(hit) = blacklist
                .iter()
                .find(|directive| contains_ignore_ascii_case(part, directive.as_bytes()))
            {
                return Some(hit.as_str());
            }
        }
    }
    None
}

fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
