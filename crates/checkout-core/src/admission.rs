//! # Admission Controller
//!
//! Per-caller fixed-window rate limiting with a one-minute and a one-hour
//! window, both of which must have room for a request to be admitted.
//!
//! Windows are aligned to the clock (minute: `:00` seconds, hour: `:00`
//! minutes), so a caller can spend a full budget at the end of one window and
//! another right after the boundary. Counters are read and incremented in
//! separate calls without a transaction; concurrent requests for the same
//! identifier may both pass the check.
//!
//! Storage failures fail open: the request is admitted and the failure is
//! recorded as a `database` error.

use crate::config::RateLimits;
use crate::error::{CheckoutError, CheckoutResult, ErrorType};
use crate::reporter::{ErrorReporter, RequestContext};
use crate::store::{BoxedStore, CounterKey, Granularity, IdentifierType, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, instrument, warn};

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub retry_after_secs: Option<u64>,
}

impl AdmissionDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
        }
    }

    pub fn deny(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: Some(retry_after_secs),
        }
    }

    /// `Err(RateLimited)` for a denial
    pub fn into_result(self) -> CheckoutResult<()> {
        match self.retry_after_secs {
            Some(retry_after_secs) if !self.allowed => {
                Err(CheckoutError::RateLimited { retry_after_secs })
            }
            _ => Ok(()),
        }
    }
}

/// Fixed-window rate limiter over the shared counter table
#[derive(Clone)]
pub struct AdmissionController {
    store: BoxedStore,
    limits: RateLimits,
    reporter: ErrorReporter,
}

impl AdmissionController {
    pub fn new(store: BoxedStore, limits: RateLimits, reporter: ErrorReporter) -> Self {
        Self {
            store,
            limits,
            reporter,
        }
    }

    /// Admit or reject one request from `identifier` against `scope`
    pub async fn admit(
        &self,
        ctx: &RequestContext,
        identifier: &str,
        identifier_type: IdentifierType,
        scope: &str,
    ) -> AdmissionDecision {
        self.admit_at(Utc::now(), ctx, identifier, identifier_type, scope)
            .await
    }

    /// Same as [`admit`](Self::admit) with an explicit clock
    #[instrument(skip(self, ctx), fields(identifier_type = identifier_type.as_str()))]
    pub async fn admit_at(
        &self,
        now: DateTime<Utc>,
        ctx: &RequestContext,
        identifier: &str,
        identifier_type: IdentifierType,
        scope: &str,
    ) -> AdmissionDecision {
        self.collect_garbage(now).await;

        match self.evaluate(now, identifier, identifier_type, scope).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Rate limiter storage failed, admitting request: {}", e);
                self.reporter
                    .report(
                        ctx,
                        ErrorType::Database,
                        format!("Rate limit check failed: {}", e),
                        json!({
                            "identifier_type": identifier_type.as_str(),
                            "scope": scope,
                            "fail_open": true,
                        }),
                    )
                    .await;
                AdmissionDecision::allow()
            }
        }
    }

    async fn evaluate(
        &self,
        now: DateTime<Utc>,
        identifier: &str,
        identifier_type: IdentifierType,
        scope: &str,
    ) -> Result<AdmissionDecision, StoreError> {
        let mut retry_after: Option<u64> = None;

        for granularity in Granularity::ALL {
            let key = counter_key(identifier, identifier_type, scope, granularity);
            let window_start = granularity.window_start(now);
            let count = self.store.counter(&key, window_start).await?.unwrap_or(0);
            let limit = self.limits.limit(granularity);

            if count >= limit {
                let wait = granularity.seconds_until_reset(now);
                debug!(
                    granularity = granularity.as_str(),
                    count, limit, wait, "Window exhausted"
                );
                retry_after = Some(retry_after.map_or(wait, |w| w.max(wait)));
            }
        }

        if let Some(wait) = retry_after {
            warn!(scope, retry_after = wait, "Rate limit exceeded");
            return Ok(AdmissionDecision::deny(wait));
        }

        for granularity in Granularity::ALL {
            let key = counter_key(identifier, identifier_type, scope, granularity);
            self.store
                .increment_counter(&key, granularity.window_start(now))
                .await?;
        }

        Ok(AdmissionDecision::allow())
    }

    /// Drop counter rows older than the longest window. Failures only warn.
    async fn collect_garbage(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        match self.store.delete_counters_before(cutoff).await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Expired rate-limit rows deleted"),
            Err(e) => warn!("Rate-limit cleanup failed: {}", e),
        }
    }
}

fn counter_key(
    identifier: &str,
    identifier_type: IdentifierType,
    scope: &str,
    granularity: Granularity,
) -> CounterKey {
    CounterKey {
        identifier: identifier.to_string(),
        identifier_type,
        scope: scope.to_string(),
        granularity,
    }
}
