//! `/auth/*` handlers: code request, verification, logout and `me`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue, Uri},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use civic_shared::constants::{LEGACY_COOKIES, SESSION_COOKIE};
use civic_shared::protocol::ProfileSnapshot;

use super::json_body;
use crate::auth::GeoHint;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::extract::{presented_token, AuthUser};
use crate::state::AppState;

#[derive(Deserialize)]
struct PhoneData {
    phone: Option<String>,
}

/// Accepts both `{phone}` and `{data: {phone}, locationData}`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendOtpRequest {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    data: Option<PhoneData>,
    #[serde(default)]
    location_data: Option<GeoHint>,
}

impl SendOtpRequest {
    fn phone(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.phone.as_deref())
            .or(self.phone.as_deref())
            .filter(|p| !p.trim().is_empty())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendOtpResponse {
    success: bool,
    message: &'static str,
    resend_after: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    otp: Option<String>,
}

pub(super) async fn send_otp(
    State(state): State<AppState>,
    payload: Result<Json<SendOtpRequest>, JsonRejection>,
) -> Result<Json<SendOtpResponse>, ServerError> {
    let req = json_body(payload)?;
    let phone = req
        .phone()
        .ok_or_else(|| ServerError::BadRequest("Phone number is required".into()))?;

    let issued = state.auth.request_code(phone, req.location_data).await?;

    Ok(Json(SendOtpResponse {
        success: true,
        message: "OTP sent successfully",
        resend_after: issued.resend_after,
        otp: issued.code,
    }))
}

#[derive(Deserialize)]
pub(super) struct VerifyOtpRequest {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    otp: Option<String>,
}

#[derive(Serialize)]
pub(super) struct VerifyOtpResponse {
    success: bool,
    token: String,
    profile: ProfileSnapshot,
}

pub(super) async fn verify_otp(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<VerifyOtpRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<VerifyOtpResponse>), ServerError> {
    let req = json_body(payload)?;
    let (Some(phone), Some(otp)) = (req.phone, req.otp) else {
        return Err(ServerError::BadRequest("Phone and OTP are required".into()));
    };

    let verified = state.auth.verify_code(&phone, &otp).await?;

    let max_age = time::Duration::seconds(state.sessions.codec().ttl().num_seconds());
    let mut cookie = scoped_cookie(&state.config, SESSION_COOKIE, verified.session.token.clone());
    cookie.set_max_age(max_age);

    Ok((
        jar.add(cookie),
        Json(VerifyOtpResponse {
            success: true,
            token: verified.session.token,
            profile: verified.profile.snapshot(),
        }),
    ))
}

/// Clears session cookies and revokes the presented token, if any.
pub(super) async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    mut jar: CookieJar,
) -> impl IntoResponse {
    let token = presented_token(&headers, &uri);
    match state.sessions.authenticate(token.as_deref()).await {
        Ok(auth) => state.sessions.revoke(&auth.claims).await,
        Err(e) => debug!(error = %e, "Logout without a live session"),
    }

    // Emit removals even when the request carried no cookies.
    for name in std::iter::once(SESSION_COOKIE).chain(LEGACY_COOKIES) {
        let mut cookie = scoped_cookie(&state.config, name, String::new());
        cookie.make_removal();
        jar = jar.add(cookie);
    }

    (
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        jar,
        Json(serde_json::json!({
            "success": true,
            "message": "Logged out successfully",
        })),
    )
}

pub(super) async fn me(user: AuthUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "profile": user.profile.snapshot(),
    }))
}

/// Attributes shared by the session cookie and its removal.
fn scoped_cookie(config: &ServerConfig, name: &'static str, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::None)
        .secure(config.cookie_secure)
        .build();
    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::super::build_router;
    use super::super::testing::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    async fn login(app: &axum::Router, phone: &str) -> (String, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(json_request("POST", "/auth/send-otp", None, json!({ "phone": phone })))
            .await
            .unwrap();
        let otp = body_json(resp).await["otp"].as_str().unwrap().to_string();

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/auth/verify-otp",
                None,
                json!({ "phone": phone, "otp": otp }),
            ))
            .await
            .unwrap();
        let body = body_json(resp).await;
        (body["token"].as_str().unwrap().to_string(), body["profile"].clone())
    }

    #[tokio::test]
    async fn test_send_otp_accepts_both_body_shapes() {
        let app = build_router(test_state());

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/auth/send-otp", None, json!({ "phone": "5551234567" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["otp"].as_str().unwrap().len(), 6);
        assert!(body["resendAfter"].is_string());

        let resp = app
            .oneshot(json_request(
                "POST",
                "/auth/send-otp",
                None,
                json!({
                    "data": { "phone": "5559876543" },
                    "locationData": { "latitude": 44.97, "longitude": -93.26 }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_otp_throttled_per_phone() {
        let app = build_router(test_state());
        for _ in 0..5 {
            let resp = app
                .clone()
                .oneshot(json_request("POST", "/auth/send-otp", None, json!({ "phone": "5551234567" })))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/auth/send-otp", None, json!({ "phone": "555 123 4567" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = resp.headers()["retry-after"].to_str().unwrap().parse().unwrap();
        assert!(retry > 0);
        assert_eq!(body_json(resp).await["success"], false);

        let resp = app
            .oneshot(json_request("POST", "/auth/send-otp", None, json!({ "phone": "5559876543" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_otp_requires_phone() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(json_request("POST", "/auth/send-otp", None, json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["message"], "Phone number is required");
    }

    #[tokio::test]
    async fn test_verify_sets_cookie_and_returns_token() {
        let app = build_router(test_state());
        let resp = app
            .clone()
            .oneshot(json_request("POST", "/auth/send-otp", None, json!({ "phone": "5551234567" })))
            .await
            .unwrap();
        let otp = body_json(resp).await["otp"].as_str().unwrap().to_string();

        let resp = app
            .oneshot(json_request(
                "POST",
                "/auth/verify-otp",
                None,
                json!({ "phone": "5551234567", "otp": otp }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let cookie = resp
            .headers()
            .get("set-cookie")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("token="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=None"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Max-Age=604800"));

        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["profile"]["role"], "VOTER");
        assert!(body["token"].as_str().unwrap().split('.').count() == 3);
    }

    #[tokio::test]
    async fn test_wrong_otp_is_generic_400() {
        let app = build_router(test_state());
        app.clone()
            .oneshot(json_request("POST", "/auth/send-otp", None, json!({ "phone": "5551234567" })))
            .await
            .unwrap();

        let resp = app
            .oneshot(json_request(
                "POST",
                "/auth/verify-otp",
                None,
                json!({ "phone": "5551234567", "otp": "000000" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["message"], "Invalid or expired OTP");
    }

    #[tokio::test]
    async fn test_me_and_logout_revokes_token() {
        let app = build_router(test_state());
        let (token, profile) = login(&app, "5551234567").await;

        let resp = app
            .clone()
            .oneshot(get_request("/auth/me", Some(&token)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["profile"]["id"], profile["id"]);

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/auth/logout", Some(&token), json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
        let cleared: Vec<_> = resp
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        for name in ["token=", "refreshToken=", "sessionId="] {
            assert!(cleared.iter().any(|c| c.starts_with(name)), "{name} not cleared");
        }

        let resp = app
            .oneshot(get_request("/auth/me", Some(&token)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cookie_token_authenticates() {
        let app = build_router(test_state());
        let (token, _) = login(&app, "5551234567").await;

        let req = axum::http::Request::builder()
            .uri("/auth/me")
            .header("cookie", format!("token={token}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_bearer_falls_back_to_cookie() {
        let app = build_router(test_state());
        let (token, _) = login(&app, "5551234567").await;

        let req = axum::http::Request::builder()
            .uri("/auth/me")
            .header("authorization", "Bearer ")
            .header("cookie", format!("token={token}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_scoped_cookie_attributes() {
        let config = crate::config::ServerConfig {
            cookie_domain: Some("example.org".into()),
            cookie_secure: true,
            ..crate::config::ServerConfig::default()
        };
        let rendered = super::scoped_cookie(&config, "token", "abc".into()).to_string();
        assert!(rendered.starts_with("token=abc"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("Domain=example.org"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("Secure"));
    }

    #[tokio::test]
    async fn test_logout_without_session_still_clears() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(json_request("POST", "/auth/logout", None, json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
