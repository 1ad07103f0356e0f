use super::{error_response, valid_email};
use crate::{
    attempts::{
        normalize_account_key, resolver::ResolutionFailure, AttemptTracker, FailureReport,
        ResolutionOutcome,
    },
    credentials::{CredentialVerifier, Verification},
};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct UserLogin {
    email: Option<String>,
    #[schema(value_type = Option<String>)]
    password: Option<SecretString>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginSuccess {
    success: bool,
    message: String,
}

/// Whether the recipient id lookup worked at the threshold.
#[derive(ToSchema, Serialize, Debug, PartialEq, Eq)]
pub struct ResolutionStatus {
    resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<ResolutionFailure>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginFailure {
    error: String,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<ResolutionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notify_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notify_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning_error: Option<String>,
}

impl LoginFailure {
    fn from_report(report: FailureReport, notification: String) -> Self {
        if !report.triggered {
            return Self {
                error: "Invalid password".to_string(),
                attempts: report.attempts_so_far,
                notification: None,
                resolution: None,
                notify_sent: None,
                notify_error: None,
                warning_error: None,
            };
        }

        let resolution = report.resolution.map(|outcome| match outcome {
            ResolutionOutcome::Resolved(_) => ResolutionStatus {
                resolved: true,
                failure: None,
            },
            ResolutionOutcome::Failed { kind, .. } => ResolutionStatus {
                resolved: false,
                failure: Some(kind),
            },
        });

        Self {
            error: "Invalid password".to_string(),
            attempts: report.attempts_so_far,
            notification: Some(notification),
            resolution,
            notify_sent: Some(report.notify_sent),
            notify_error: report.notify_error,
            warning_error: report.warning_error,
        }
    }
}

#[utoipa::path(
    post,
    path= "/login",
    request_body = UserLogin,
    responses (
        (status = 200, description = "Login successful", body = LoginSuccess, content_type = "application/json"),
        (status = 400, description = "Missing or malformed email or password", body = super::ErrorBody),
        (status = 403, description = "Invalid password, attempt counted", body = LoginFailure),
        (status = 404, description = "User not found", body = super::ErrorBody),
        (status = 500, description = "Storage failure", body = super::ErrorBody),
    ),
    tag= "login"
)]
// axum handler for login
#[instrument(skip(tracker, verifier))]
pub async fn login(
    tracker: Extension<Arc<AttemptTracker>>,
    verifier: Extension<Arc<dyn CredentialVerifier>>,
    payload: Option<Json<UserLogin>>,
) -> Response {
    let user: UserLogin = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let email = match user.email.as_deref().map(normalize_account_key) {
        Some(email) if !email.is_empty() => email,
        _ => return error_response(StatusCode::BAD_REQUEST, "Missing email"),
    };

    let Some(password) = user
        .password
        .filter(|password| !password.expose_secret().is_empty())
    else {
        return error_response(StatusCode::BAD_REQUEST, "Missing password");
    };

    if !valid_email(&email) {
        error!("Invalid email");

        return error_response(StatusCode::BAD_REQUEST, "Invalid email");
    }

    let verification = match verifier.verify(&email, &password).await {
        Ok(verification) => verification,
        Err(e) => {
            error!("Error verifying credentials: {:#}", e);

            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error verifying credentials",
            );
        }
    };

    match verification {
        Verification::UnknownAccount => {
            debug!("User not found");

            error_response(StatusCode::NOT_FOUND, "User not found")
        }

        Verification::Valid => match tracker.record_success(&email).await {
            Ok(()) => {
                debug!("Login successful");

                (
                    StatusCode::OK,
                    Json(LoginSuccess {
                        success: true,
                        message: "Logged in successfully".to_string(),
                    }),
                )
                    .into_response()
            }

            Err(e) => {
                error!("Error resetting login attempts: {:#}", e);

                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Error recording login")
            }
        },

        Verification::Invalid => match tracker.record_failure(&email).await {
            Ok(report) => {
                if report.triggered {
                    warn!(
                        notify_sent = report.notify_sent,
                        "failed login threshold reached"
                    );
                }

                let body = LoginFailure::from_report(report, tracker.warning_message());
                (StatusCode::FORBIDDEN, Json(body)).into_response()
            }

            Err(e) => {
                error!("Error recording failed login: {:#}", e);

                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Error recording login")
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(triggered: bool) -> FailureReport {
        FailureReport {
            attempts_so_far: 3,
            triggered,
            resolution: Some(ResolutionOutcome::Failed {
                kind: ResolutionFailure::TransportError,
                detail: "connection refused".to_string(),
            }),
            notify_sent: false,
            notify_error: None,
            warning_error: None,
        }
    }

    #[test]
    fn below_threshold_body_has_only_attempts() -> anyhow::Result<()> {
        let body = LoginFailure::from_report(report(false), "warning".to_string());
        let json = serde_json::to_value(&body)?;
        assert_eq!(
            json,
            serde_json::json!({"error": "Invalid password", "attempts": 3})
        );
        Ok(())
    }

    #[test]
    fn triggered_body_reports_resolution_without_detail() -> anyhow::Result<()> {
        let body = LoginFailure::from_report(report(true), "warning".to_string());
        let json = serde_json::to_value(&body)?;
        assert_eq!(json["notification"], "warning");
        assert_eq!(json["notify_sent"], false);
        assert_eq!(json["resolution"]["resolved"], false);
        assert_eq!(json["resolution"]["failure"], "transport_error");
        assert!(json.get("notify_error").is_none());
        assert!(json.get("warning_error").is_none());
        Ok(())
    }

    #[test]
    fn failed_warning_task_is_reported_separately() -> anyhow::Result<()> {
        let report = FailureReport {
            resolution: None,
            warning_error: Some("warning task panicked".to_string()),
            ..report(true)
        };
        let json = serde_json::to_value(LoginFailure::from_report(report, "warning".to_string()))?;
        assert_eq!(json["warning_error"], "warning task panicked");
        assert_eq!(json["notify_sent"], false);
        assert!(json.get("resolution").is_none());
        assert!(json.get("notify_error").is_none());
        Ok(())
    }
}
