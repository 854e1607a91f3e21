//! # Error Reporter
//!
//! Writes structured failure records to the durable error log. Reporting
//! never fails: a write error is only surfaced through `tracing`.

use crate::error::{CheckoutError, ErrorType};
use crate::store::{BoxedStore, ErrorLogEntry};
use chrono::Utc;
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

/// What is known about the caller of the current request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub ip_address: Option<String>,
    /// Sanitized copy of the inbound request
    pub snapshot: Value,
}

impl RequestContext {
    pub fn new(ip_address: Option<String>, snapshot: Value) -> Self {
        Self {
            user_id: None,
            email: None,
            ip_address,
            snapshot,
        }
    }

    /// Builder: attach the authenticated user
    pub fn with_user(mut self, user_id: Uuid, email: Option<String>) -> Self {
        self.user_id = Some(user_id);
        self.email = email;
        self
    }
}

/// Appends failures to the error log
#[derive(Clone)]
pub struct ErrorReporter {
    store: BoxedStore,
    function_name: String,
}

impl ErrorReporter {
    pub fn new(store: BoxedStore, function_name: impl Into<String>) -> Self {
        Self {
            store,
            function_name: function_name.into(),
        }
    }

    /// Record one failure
    pub async fn report(
        &self,
        ctx: &RequestContext,
        error_type: ErrorType,
        message: impl Into<String>,
        details: Value,
    ) {
        let entry = ErrorLogEntry {
            function_name: self.function_name.clone(),
            error_type,
            message: message.into(),
            details,
            user_id: ctx.user_id,
            request_snapshot: ctx.snapshot.clone(),
            ip_address: ctx.ip_address.clone(),
            timestamp: Utc::now(),
        };

        if error_type == ErrorType::Validation || error_type == ErrorType::Auth {
            warn!(
                error_type = %error_type,
                user_id = ?entry.user_id,
                "{}",
                entry.message
            );
        } else {
            error!(
                error_type = %error_type,
                user_id = ?entry.user_id,
                details = %entry.details,
                "{}",
                entry.message
            );
        }

        if let Err(e) = self.store.insert_error_log(&entry).await {
            error!(
                function_name = %entry.function_name,
                error_type = %entry.error_type,
                "Failed to write error log entry: {}",
                e
            );
        }
    }

    /// Record a `CheckoutError` with its own category and full detail
    pub async fn report_error(&self, ctx: &RequestContext, err: &CheckoutError, details: Value) {
        self.report(ctx, err.error_type(), err.to_string(), details).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStore;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_report_appends_entry() {
        let store = Arc::new(FakeStore::new());
        let reporter = ErrorReporter::new(store.clone(), "create-checkout");
        let user = Uuid::new_v4();
        let ctx = RequestContext::new(Some("203.0.113.7".into()), json!({"path": "/checkout"}))
            .with_user(user, None);

        reporter
            .report(&ctx, ErrorType::StripeApi, "card_declined", json!({"stage": "session"}))
            .await;

        let logs = store.error_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].function_name, "create-checkout");
        assert_eq!(logs[0].error_type, ErrorType::StripeApi);
        assert_eq!(logs[0].user_id, Some(user));
        assert_eq!(logs[0].ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(logs[0].details["stage"], "session");
    }

    #[tokio::test]
    async fn test_report_swallows_store_failure() {
        let store = Arc::new(FakeStore::new());
        store.fail_error_log(true);
        let reporter = ErrorReporter::new(store.clone(), "create-checkout");

        reporter
            .report_error(
                &RequestContext::default(),
                &CheckoutError::Internal("boom".into()),
                Value::Null,
            )
            .await;

        assert!(store.error_logs().is_empty());
    }
}
