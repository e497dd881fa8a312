//! Security audit logging for token events
//!
//! All audit events are logged at INFO level with the "audit" target,
//! making them easy to filter and route to security monitoring systems.
//! Events never carry the raw token or code that was presented.
//!
//! # Example
//!
//! ```ignore
//! use tessera_api::audit::{AuditEvent, audit_log};
//!
//! audit_log(&AuditEvent::TokenRefresh {
//!     user_id: "user-1".to_string(),
//!     ip_address: Some("192.168.1.1".to_string()),
//!     user_agent: None,
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Refresh token exchanged for a new pair
    TokenRefresh {
        user_id: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Refresh token rejected
    RefreshRejected {
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// User logout
    Logout {
        user_id: String,
        ip_address: Option<String>,
        logout_all_devices: bool,
        refresh_tokens_revoked: usize,
        sessions_deleted: usize,
    },

    /// Invalid, expired or revoked bearer token used
    InvalidToken {
        ip_address: Option<String>,
        user_agent: Option<String>,
        reason: String,
    },

    /// Access denied due to insufficient permissions
    AccessDenied {
        user_id: String,
        resource: String,
        required_role: String,
        ip_address: Option<String>,
    },

    /// Step-up challenge started
    StepUpStarted {
        user_id: String,
        ip_address: Option<String>,
    },

    /// Step-up completed, or rejected when `user_id` is absent
    StepUpCompleted {
        user_id: Option<String>,
        success: bool,
        ip_address: Option<String>,
    },

    /// Premium code redemption attempt
    CodeRedemption {
        user_id: String,
        success: bool,
        failure_reason: Option<String>,
        ip_address: Option<String>,
    },

    /// Premium code minted by an operator
    CodeMinted {
        issued_by: String,
        expires_at: DateTime<Utc>,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::TokenRefresh { .. } => "Token refreshed",
            AuditEvent::RefreshRejected { .. } => "Refresh token rejected",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::InvalidToken { .. } => "Invalid token",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::StepUpStarted { .. } => "Step-up started",
            AuditEvent::StepUpCompleted { .. } => "Step-up completed",
            AuditEvent::CodeRedemption { .. } => "Premium code redemption",
            AuditEvent::CodeMinted { .. } => "Premium code minted",
        }
    }

    /// Failures are raised to WARN so they stand out in the audit stream
    fn is_failure(&self) -> bool {
        match self {
            AuditEvent::RefreshRejected { .. }
            | AuditEvent::InvalidToken { .. }
            | AuditEvent::AccessDenied { .. } => true,
            AuditEvent::StepUpCompleted { success, .. }
            | AuditEvent::CodeRedemption { success, .. } => !success,
            _ => false,
        }
    }
}

/// Log a security audit event with structured fields
///
/// The event is serialized to JSON for log aggregators. Example output:
///
/// ```json
/// {
///   "event_type": "code_redemption",
///   "user_id": "user-1",
///   "success": false,
///   "failure_reason": "CODE_USED",
///   "ip_address": "192.168.1.1"
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    if event.is_failure() {
        warn!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            "{}",
            event.summary()
        );
    } else {
        info!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            "{}",
            event.summary()
        );
    }
}

/// Extract client IP address from request headers
///
/// Checks headers in order of preference:
/// 1. X-Forwarded-For (first IP in the chain)
/// 2. X-Real-IP
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.trim().to_string());
        }
    }

    None
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::CodeRedemption {
            user_id: "user-1".to_string(),
            success: false,
            failure_reason: Some("CODE_USED".to_string()),
            ip_address: Some("192.168.1.1".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"code_redemption\""));
        assert!(json.contains("CODE_USED"));
        assert!(event.is_failure());
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(&AuditEvent::Logout {
            user_id: "user-1".to_string(),
            ip_address: None,
            logout_all_devices: true,
            refresh_tokens_revoked: 3,
            sessions_deleted: 2,
        });
        audit_log(&AuditEvent::InvalidToken {
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: None,
            reason: "expired".to_string(),
        });
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        let ip = extract_ip_address(&headers);
        assert_eq!(ip, Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        let ip = extract_ip_address(&headers);
        assert_eq!(ip, Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = axum::http::HeaderMap::new();

        assert_eq!(extract_ip_address(&headers), None);
        assert_eq!(extract_user_agent(&headers), None);
    }
}
