mod common;

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};

use tandem_back::dao::{chat_store::ChatStore, models::RelationshipEntity};

use common::{TestApp, TestUser};

async fn code_of(app: &TestApp, user: &TestUser) -> String {
    let (status, body) = app
        .request(Method::GET, "/me/overview", Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    body["partner_code"].as_str().unwrap().to_owned()
}

async fn redeem(app: &TestApp, user: &TestUser, code: &str) -> (StatusCode, Value) {
    app.request(
        Method::POST,
        "/pairing/redeem",
        Some(&user.token),
        Some(json!({ "code": code })),
    )
    .await
}

#[tokio::test]
async fn redeeming_pairs_both_sides() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let code = code_of(&app, &ada).await;

    let mut ada_events = app.state.user_events().subscribe(ada.uid);

    let (status, body) = redeem(&app, &bob, &format!(" {} ", code.to_lowercase())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["relationship_status"], "in_relationship");
    assert_eq!(body["partner_uid"], ada.uid.to_string());
    assert_eq!(body["partner_name"], "ada");
    assert!(body.get("partner_code").is_none());

    let (_, body) = app
        .request(Method::GET, "/me/overview", Some(&ada.token), None)
        .await;
    assert_eq!(body["relationship_status"], "in_relationship");
    assert_eq!(body["partner_name"], "bob");
    assert!(body.get("partner_code").is_none());

    let event = ada_events.try_recv().unwrap();
    assert_eq!(event.event.as_deref(), Some("partner.paired"));
    assert!(event.data.contains(&bob.uid.to_string()));

    // The code is spent.
    let carol = app.user("carol").await;
    let (status, _) = redeem(&app, &carol, &code).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_codes_are_rejected() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let code = code_of(&app, &ada).await;

    let (status, _) = redeem(&app, &ada, &code).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = redeem(&app, &ada, "AB!?").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = redeem(&app, &ada, "ABCDE").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unused = if code == "0000" { "0001" } else { "0000" };
    let (status, _) = redeem(&app, &ada, unused).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_redeems_pair_exactly_once() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let carol = app.user("carol").await;
    let code = code_of(&app, &ada).await;

    let ((bob_status, _), (carol_status, _)) =
        tokio::join!(redeem(&app, &bob, &code), redeem(&app, &carol, &code));

    let mut statuses = [bob_status, carol_status];
    statuses.sort();
    assert_eq!(statuses[0], StatusCode::OK);
    assert_ne!(statuses[1], StatusCode::OK);

    let (_, overview) = app
        .request(Method::GET, "/me/overview", Some(&ada.token), None)
        .await;
    let winner = if bob_status == StatusCode::OK { &bob } else { &carol };
    assert_eq!(overview["partner_uid"], winner.uid.to_string());
}

#[tokio::test]
async fn unpairing_frees_both_partners() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let code = code_of(&app, &ada).await;
    redeem(&app, &bob, &code).await;

    let (status, _) = app
        .request(Method::POST, "/pairing/code", Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .request(Method::DELETE, "/pairing", Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["relationship_status"], "single");
    assert_eq!(body["partner_code"].as_str().unwrap().len(), 4);

    let (status, body) = app.request(Method::GET, "/me", Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["relationship_status"], "single");
    assert!(body.get("partner_uid").is_none());

    let (status, _) = app
        .request(Method::DELETE, "/pairing", Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn renaming_updates_the_partner_view() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let code = code_of(&app, &ada).await;
    redeem(&app, &bob, &code).await;

    let (status, _) = app
        .request(
            Method::PATCH,
            "/me",
            Some(&ada.token),
            Some(json!({ "name": "Ada Lovelace" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .request(Method::GET, "/me/overview", Some(&bob.token), None)
        .await;
    assert_eq!(body["partner_name"], "Ada Lovelace");
}

#[tokio::test]
async fn fresh_codes_replace_old_ones() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let old = code_of(&app, &ada).await;

    let (status, body) = app
        .request(Method::POST, "/pairing/code", Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let new = body["code"].as_str().unwrap().to_owned();

    if new != old {
        let (status, _) = redeem(&app, &bob, &old).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    let (status, _) = redeem(&app, &bob, &new).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn overview_repairs_a_one_sided_pairing() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;

    // Only bob's side of the pairing was written.
    let mut stored = app.store.find_user(bob.uid).await.unwrap().unwrap();
    stored.relationship = RelationshipEntity::InRelationship {
        partner_uid: ada.uid,
        partner_name: "ada".into(),
    };
    stored.partner_code = None;
    let expected = stored.bump();
    assert!(app.store.update_user(stored, expected).await.unwrap());

    let (status, body) = app
        .request(Method::GET, "/me/overview", Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["relationship_status"], "in_relationship");
    assert_eq!(body["partner_uid"], bob.uid.to_string());
    assert_eq!(body["partner_name"], "bob");
    assert!(body.get("partner_code").is_none());

    let repaired = app.store.find_user(ada.uid).await.unwrap().unwrap();
    assert_eq!(repaired.partner_uid(), Some(bob.uid));
}
