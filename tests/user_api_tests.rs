mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{send, spawn_app};
use estate_portal::models::Role;

#[tokio::test]
async fn me_returns_the_caller_without_secret_fields() {
    let app = spawn_app();
    let (user, token) = app.seed_user(Role::User, true);

    let (status, body) = send(&app.router, "GET", "/api/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["email"], user.email);
    assert!(body["data"]["user"].get("password_hash").is_none());

    // The /auth alias serves the same record.
    let (status, body) = send(&app.router, "GET", "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["id"], json!(user.id));
}

#[tokio::test]
async fn update_me_applies_the_allow_list_and_rejects_password_keys() {
    let app = spawn_app();
    let (_, token) = app.seed_user(Role::User, true);

    let (status, body) = send(
        &app.router,
        "PATCH",
        "/api/v1/users/update-me",
        Some(&token),
        Some(json!({
            "name": "Renamed Person",
            "role": "admin",
            "email_verified": false,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["name"], "Renamed Person");
    // Out-of-list keys were dropped, not applied.
    assert_eq!(body["data"]["user"]["role"], "user");
    assert_eq!(body["data"]["user"]["email_verified"], true);

    let (status, body) = send(
        &app.router,
        "PATCH",
        "/api/v1/users/update-me",
        Some(&token),
        Some(json!({"password": "sneaky-password"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "This route is not for password updates. Please use /update-password."
    );
}

#[tokio::test]
async fn update_me_multipart_stores_a_photo() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    let app = spawn_app();
    let (user, token) = app.seed_user(Role::User, true);

    let boundary = "test-boundary-7f2a";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"name\"\r\n\r\n\
         Photo Person\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"photo\"; filename=\"me.png\"\r\n\
         Content-Type: image/png\r\n\r\n\
         fake-image-bytes\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("PATCH")
        .uri("/api/v1/users/update-me")
        .header("Authorization", format!("Bearer {token}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let users = app.repo.users.lock().unwrap();
    let row = users.iter().find(|u| u.id == user.id).unwrap();
    assert_eq!(row.name, "Photo Person");
    assert_eq!(row.photo.as_deref(), Some(format!("user-{}-mock.jpeg", user.id).as_str()));
}

#[tokio::test]
async fn update_me_multipart_rejects_non_image_uploads() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    let app = spawn_app();
    let (user, token) = app.seed_user(Role::User, true);

    let boundary = "test-boundary-7f2a";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"photo\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         just some text\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("PATCH")
        .uri("/api/v1/users/update-me")
        .header("Authorization", format!("Bearer {token}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The file never reached the media store.
    assert!(app.media.stored.lock().unwrap().is_empty());
    let users = app.repo.users.lock().unwrap();
    assert!(users.iter().find(|u| u.id == user.id).unwrap().photo.is_none());
}

#[tokio::test]
async fn delete_me_deactivates_and_kills_the_session() {
    let app = spawn_app();
    let (user, token) = app.seed_user(Role::User, true);

    let (status, _) = send(
        &app.router,
        "DELETE",
        "/api/v1/users/delete-me",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The row survives, deactivated.
    {
        let users = app.repo.users.lock().unwrap();
        let row = users.iter().find(|u| u.id == user.id).unwrap();
        assert!(!row.active);
    }

    // The still-valid JWT no longer authenticates.
    let (status, _) = send(&app.router, "GET", "/api/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Neither does a fresh login.
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({"email": user.email, "password": common::TEST_PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_surface_is_admin_only() {
    let app = spawn_app();
    let (_, user_token) = app.seed_user(Role::User, true);
    let (_, agent_token) = app.seed_user(Role::Agent, true);

    for token in [&user_token, &agent_token] {
        let (status, _) = send(&app.router, "GET", "/api/v1/users", Some(token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
    let (status, _) = send(&app.router, "GET", "/api/v1/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_manages_users_end_to_end() {
    let app = spawn_app();
    let (_, admin_token) = app.seed_user(Role::Admin, true);
    let (target, _) = app.seed_user(Role::User, true);

    // List with a role filter.
    let (status, body) = send(
        &app.router,
        "GET",
        "/api/v1/users?role=user",
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 1);

    // Promote to agent; only the admin path can change roles.
    let (status, body) = send(
        &app.router,
        "PATCH",
        &format!("/api/v1/users/{}", target.id),
        Some(&admin_token),
        Some(json!({"role": "agent", "active": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["role"], "agent");
    assert_eq!(body["data"]["user"]["active"], false);

    // Hard delete removes the row and its photo file.
    {
        let mut users = app.repo.users.lock().unwrap();
        users.iter_mut().find(|u| u.id == target.id).unwrap().photo =
            Some("user-abc-1.jpeg".to_string());
    }
    let (status, _) = send(
        &app.router,
        "DELETE",
        &format!("/api/v1/users/{}", target.id),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!app.repo.users.lock().unwrap().iter().any(|u| u.id == target.id));
    assert!(app
        .media
        .deleted
        .lock()
        .unwrap()
        .contains(&"user-abc-1.jpeg".to_string()));

    let (status, _) = send(
        &app.router,
        "DELETE",
        &format!("/api/v1/users/{}", target.id),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_probe_is_public() {
    let app = spawn_app();
    let (status, _) = send(&app.router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
