mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{PASSWORD, TestApp};
use tandem_back::services::mailer::MailKind;

#[tokio::test]
async fn healthcheck_reports_store_state() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/healthcheck", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    app.store.set_offline(true);
    let (_, body) = app.request(Method::GET, "/healthcheck", None, None).await;
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn registration_requires_verification_before_pairing() {
    let app = TestApp::new().await;
    let (_uid, email, verification) = app.register("ada").await;

    let (status, body) = app.login(&email, PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profile"]["email_verified"], false);
    let token = body["token"].as_str().unwrap().to_owned();

    let (status, _) = app
        .request(Method::GET, "/me/overview", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The emailed link works as well as the POST endpoint.
    let (status, body) = app
        .request(
            Method::GET,
            &format!("/auth/verify?token={verification}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email_verified"], true);

    // Verifying twice is harmless.
    let (status, _) = app
        .request(
            Method::POST,
            "/auth/verify",
            None,
            Some(json!({ "token": verification })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(Method::GET, "/me/overview", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["relationship_status"], "single");
    assert_eq!(body["partner_code"].as_str().unwrap().len(), 4);
}

#[tokio::test]
async fn registration_rejects_bad_input() {
    let app = TestApp::new().await;
    app.register("ada").await;

    // Emails are compared case-insensitively.
    let (status, _) = app
        .request(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "email": "ADA@example.com",
                "password": PASSWORD,
                "name": "Ada again",
                "sex": "f",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .request(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "email": "bob@example.com",
                "password": "123",
                "name": "Bob",
                "sex": "m",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("at least 6"));
}

#[tokio::test]
async fn login_failures_do_not_say_which_part_was_wrong() {
    let app = TestApp::new().await;
    let user = app.user("ada").await;

    let (status, wrong_password) = app.login(&user.email, "not the password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, unknown_email) = app.login("nobody@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password["message"], unknown_email["message"]);

    let (status, _) = app.request(Method::GET, "/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .request(Method::GET, "/me", Some("forged-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_the_token() {
    let app = TestApp::new().await;
    let user = app.user("ada").await;

    let (status, _) = app
        .request(Method::POST, "/auth/logout", Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .request(Method::GET, "/me", Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn verification_resend_honours_the_cooldown() {
    let app = TestApp::new().await;
    let (_uid, email, _) = app.register("ada").await;
    let (_, body) = app.login(&email, PASSWORD).await;
    let token = body["token"].as_str().unwrap().to_owned();

    let (status, body) = app
        .request(Method::POST, "/auth/verification/resend", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("retry in"));
}

#[tokio::test]
async fn password_reset_signs_out_everywhere() {
    let app = TestApp::new().await;
    let user = app.user("ada").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/auth/password/forgot",
            None,
            Some(json!({ "email": "ghost@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(
        app.mailer
            .last_to("ghost@example.com", MailKind::PasswordReset)
            .is_none()
    );

    let (status, _) = app
        .request(
            Method::POST,
            "/auth/password/forgot",
            None,
            Some(json!({ "email": user.email })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let reset = app
        .mailer
        .last_to(&user.email, MailKind::PasswordReset)
        .and_then(|mail| mail.token().map(str::to_owned))
        .unwrap();

    let (status, _) = app
        .request(
            Method::POST,
            "/auth/password/reset",
            None,
            Some(json!({ "token": reset, "new_password": "brand new secret" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(Method::GET, "/me", Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login(&user.email, PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login(&user.email, "brand new secret").await;
    assert_eq!(status, StatusCode::OK);

    // Reset tokens are single use.
    let (status, _) = app
        .request(
            Method::POST,
            "/auth/password/reset",
            None,
            Some(json!({ "token": reset, "new_password": "another one" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_updates_are_partial() {
    let app = TestApp::new().await;
    let user = app.user("ada").await;

    let (status, body) = app
        .request(
            Method::PATCH,
            "/me",
            Some(&user.token),
            Some(json!({ "name": "  Ada L. ", "phone": "+44 20 7946 0000" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Ada L.");
    assert_eq!(body["phone"], "+44 20 7946 0000");
    assert_eq!(body["sex"], "unspecified");

    let (status, _) = app
        .request(
            Method::PATCH,
            "/me",
            Some(&user.token),
            Some(json!({ "profile_image": "not a url" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn online_users_follow_live_connections() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;

    let guard = app.state.presence().connect(bob.uid);
    let (status, body) = app
        .request(Method::GET, "/users/online", Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "bob");

    drop(guard);
    let (_, body) = app
        .request(Method::GET, "/users/online", Some(&ada.token), None)
        .await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn degraded_mode_answers_service_unavailable() {
    let app = TestApp::new().await;
    let user = app.user("ada").await;
    app.state.clear_store().await;

    let (status, _) = app
        .request(Method::GET, "/me", Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (_, body) = app.request(Method::GET, "/healthcheck", None, None).await;
    assert_eq!(body["status"], "degraded");
}
