use anyhow::{Context, Result};
use authcore::{
    api,
    auth::{
        memory::{
            MemoryActionTokenRepository, MemoryQueue, MemorySessionRepository,
            MemoryUserRepository,
        },
        AuthConfig, AuthSessionService, HashCost, ManualClock, NotificationKind, Role, UserRecord,
    },
};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    users: Arc<MemoryUserRepository>,
    sessions: Arc<MemorySessionRepository>,
    queue: Arc<MemoryQueue>,
    clock: Arc<ManualClock>,
}

fn test_app() -> Result<TestApp> {
    let config = AuthConfig::new(SecretString::from(
        "integration-test-secret-0123456789abcdef",
    ))
    .with_hash_cost(HashCost {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    });
    let users = Arc::new(MemoryUserRepository::default());
    let sessions = Arc::new(MemorySessionRepository::default());
    let queue = Arc::new(MemoryQueue::default());
    let clock = Arc::new(ManualClock::new(Utc::now()));

    let service = AuthSessionService::new(
        config,
        users.clone(),
        sessions.clone(),
        Arc::new(MemoryActionTokenRepository::default()),
        queue.clone(),
    )?
    .with_clock(clock.clone());
    let app = api::app(Arc::new(service), None, None);

    Ok(TestApp {
        app,
        users,
        sessions,
        queue,
        clock,
    })
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };

        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, json))
    }

    async fn register(&self, email: &str, password: &str) -> Result<(StatusCode, Value)> {
        self.call(
            Method::POST,
            "/register",
            None,
            Some(json!({
                "email": email,
                "password": password,
                "first_name": "Alice",
                "last_name": "Liddell",
            })),
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<(StatusCode, Value)> {
        self.call(
            Method::POST,
            "/login",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    fn promote(&self, email: &str, role: Role) -> Result<()> {
        let user = self
            .users
            .find(email)
            .with_context(|| format!("no user {email}"))?;
        self.users.put(UserRecord { role, ..user });
        Ok(())
    }
}

fn mailed_token(app: &TestApp, kind: NotificationKind) -> Result<String> {
    app.queue
        .sent()
        .into_iter()
        .rev()
        .find(|n| n.kind == kind)
        .and_then(|n| n.token)
        .with_context(|| format!("no {} mail with a token", kind.template()))
}

fn token<'a>(body: &'a Value, kind: &str) -> Result<&'a str> {
    body["tokens"][kind]
        .as_str()
        .with_context(|| format!("missing {kind} in {body}"))
}

#[tokio::test]
async fn register_then_use_the_session() -> Result<()> {
    let app = test_app()?;

    let (status, body) = app.register("Alice@Example.com", "correct-pw").await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(body["user"]["role"], "user");
    assert_eq!(body["tokens"]["token_type"], "bearer");
    assert_eq!(body["tokens"]["expires_in"], 900);
    assert!(body["user"].get("password_hash").is_none());

    let access = token(&body, "access_token")?;
    let (status, me) = app.call(Method::GET, "/me", Some(access), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "alice@example.com");

    let (status, sessions) = app
        .call(Method::GET, "/me/sessions", Some(access), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions.as_array().map(Vec::len), Some(1));
    assert!(sessions[0].get("access_token_hash").is_none());

    let sent = app.queue.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::Welcome);
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_rejected_without_a_session() -> Result<()> {
    let app = test_app()?;
    let (status, _) = app.register("alice@example.com", "correct-pw").await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.register("ALICE@example.com", "another-pw").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Email already registered");

    assert_eq!(app.users.len(), 1);
    assert_eq!(app.sessions.all().len(), 1);
    Ok(())
}

#[tokio::test]
async fn registration_input_is_validated() -> Result<()> {
    let app = test_app()?;

    let (status, body) = app.register("not-an-email", "correct-pw").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid email");

    let (status, _) = app.register("alice@example.com", "123").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.users.is_empty());
    Ok(())
}

#[tokio::test]
async fn wrong_password_and_unknown_email_share_one_answer() -> Result<()> {
    let app = test_app()?;
    app.register("alice@example.com", "correct-pw").await?;

    let (wrong_status, wrong_body) = app.login("alice@example.com", "wrong-pw").await?;
    let (unknown_status, unknown_body) = app.login("bob@example.com", "wrong-pw").await?;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, unknown_body);
    assert_eq!(wrong_body["message"], "Invalid email or password");
    Ok(())
}

#[tokio::test]
async fn lockout_then_recovery_after_the_lock_period() -> Result<()> {
    let app = test_app()?;
    app.register("alice@example.com", "correct-pw").await?;

    for attempt in 1..=5 {
        let (status, _) = app.login("alice@example.com", "wrong-pw").await?;
        let expected = if attempt < 5 {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::FORBIDDEN
        };
        assert_eq!(status, expected, "attempt {attempt}");
    }

    let (status, body) = app.login("alice@example.com", "correct-pw").await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let message = body["message"].as_str().unwrap_or_default();
    assert!(message.starts_with("Account locked. Try again in "), "{message}");

    app.clock.advance(chrono::Duration::seconds(181));
    let (status, body) = app.login("alice@example.com", "correct-pw").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "alice@example.com");
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_and_the_old_pair_dies() -> Result<()> {
    let app = test_app()?;
    let (_, body) = app.register("alice@example.com", "correct-pw").await?;
    let old_access = token(&body, "access_token")?.to_string();
    let old_refresh = token(&body, "refresh_token")?.to_string();

    app.clock.advance(chrono::Duration::seconds(1));
    let (status, rotated) = app
        .call(
            Method::POST,
            "/refresh-token",
            None,
            Some(json!({ "refresh_token": old_refresh })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let new_access = token(&rotated, "access_token")?;
    assert_ne!(new_access, old_access);

    let (status, _) = app
        .call(
            Method::POST,
            "/refresh-token",
            None,
            Some(json!({ "refresh_token": old_refresh })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call(Method::GET, "/me", Some(old_access.as_str()), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid or expired session");

    let (status, _) = app.call(Method::GET, "/me", Some(new_access), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.sessions.all().len(), 1);
    Ok(())
}

#[tokio::test]
async fn access_token_expires_on_the_clock() -> Result<()> {
    let app = test_app()?;
    let (_, body) = app.register("alice@example.com", "correct-pw").await?;
    let access = token(&body, "access_token")?;

    app.clock.advance(chrono::Duration::seconds(900));
    let (status, body) = app.call(Method::GET, "/me", Some(access), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token has expired");
    Ok(())
}

#[tokio::test]
async fn logout_revokes_every_session() -> Result<()> {
    let app = test_app()?;
    let (_, first) = app.register("alice@example.com", "correct-pw").await?;
    let (_, second) = app.login("alice@example.com", "correct-pw").await?;
    let first_access = token(&first, "access_token")?;
    let second_access = token(&second, "access_token")?;

    let (status, body) = app
        .call(Method::POST, "/logout", Some(second_access), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    for access in [first_access, second_access] {
        let (status, _) = app.call(Method::GET, "/me", Some(access), None).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    assert!(app.sessions.all().iter().all(|session| !session.is_active));
    Ok(())
}

#[tokio::test]
async fn protected_routes_need_a_bearer_token() -> Result<()> {
    let app = test_app()?;
    for (method, uri) in [
        (Method::GET, "/me"),
        (Method::GET, "/me/sessions"),
        (Method::POST, "/logout"),
    ] {
        let (status, body) = app.call(method, uri, None, None).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["status"], "error");
    }

    let (status, _) = app
        .call(Method::GET, "/me", Some("not.a.jwt"), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn change_password_forces_a_new_login() -> Result<()> {
    let app = test_app()?;
    let (_, body) = app.register("alice@example.com", "correct-pw").await?;
    let access = token(&body, "access_token")?;

    let (status, _) = app
        .call(
            Method::POST,
            "/change-password",
            Some(access),
            Some(json!({ "current_password": "wrong-pw", "new_password": "new-secret" })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(
            Method::POST,
            "/change-password",
            Some(access),
            Some(json!({ "current_password": "correct-pw", "new_password": "new-secret" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call(Method::GET, "/me", Some(access), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.login("alice@example.com", "correct-pw").await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login("alice@example.com", "new-secret").await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn forgot_password_does_not_reveal_accounts() -> Result<()> {
    let app = test_app()?;
    app.register("alice@example.com", "correct-pw").await?;

    let (known_status, known_body) = app
        .call(
            Method::POST,
            "/forgot-password",
            None,
            Some(json!({ "email": "alice@example.com" })),
        )
        .await?;
    let (unknown_status, unknown_body) = app
        .call(
            Method::POST,
            "/forgot-password",
            None,
            Some(json!({ "email": "bob@example.com" })),
        )
        .await?;

    assert_eq!(known_status, StatusCode::OK);
    assert_eq!(unknown_status, StatusCode::OK);
    assert_eq!(known_body, unknown_body);
    let resets = app
        .queue
        .sent()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::PasswordResetRequested)
        .count();
    assert_eq!(resets, 1);
    Ok(())
}

#[tokio::test]
async fn reset_password_with_the_mailed_token() -> Result<()> {
    let app = test_app()?;
    let (_, body) = app.register("alice@example.com", "correct-pw").await?;
    let access = token(&body, "access_token")?;
    app.call(
        Method::POST,
        "/forgot-password",
        None,
        Some(json!({ "email": "alice@example.com" })),
    )
    .await?;
    let reset = mailed_token(&app, NotificationKind::PasswordResetRequested)?;

    let (status, _) = app
        .call(
            Method::POST,
            "/reset-password",
            None,
            Some(json!({ "token": reset, "new_password": "123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            Method::POST,
            "/reset-password",
            None,
            Some(json!({ "token": reset, "new_password": "fresh-secret" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call(Method::GET, "/me", Some(access), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login("alice@example.com", "fresh-secret").await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(
            Method::POST,
            "/reset-password",
            None,
            Some(json!({ "token": reset, "new_password": "third-secret" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid or expired token");
    Ok(())
}

#[tokio::test]
async fn email_verification_flow() -> Result<()> {
    let app = test_app()?;
    let (_, body) = app.register("alice@example.com", "correct-pw").await?;
    let access = token(&body, "access_token")?;
    assert_eq!(body["user"]["is_verified"], false);

    let (status, _) = app
        .call(Method::POST, "/send-verification", None, None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::POST, "/send-verification", Some(access), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let verification = mailed_token(&app, NotificationKind::VerifyEmail)?;

    let (status, user) = app
        .call(
            Method::POST,
            "/verify",
            None,
            Some(json!({ "token": verification })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["is_verified"], true);

    let (status, body) = app
        .call(Method::POST, "/send-verification", Some(access), None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email already verified");
    Ok(())
}

#[tokio::test]
async fn admin_routes_follow_the_role_hierarchy() -> Result<()> {
    let app = test_app()?;
    let (_, admin) = app.register("admin@example.com", "admin-pw").await?;
    app.register("bob@example.com", "bob-pw").await?;
    let admin_access = token(&admin, "access_token")?;

    let change = json!({ "email": "bob@example.com", "new_role": "moderator" });
    let (status, _) = app
        .call(
            Method::POST,
            "/admin/change-role",
            Some(admin_access),
            Some(change.clone()),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.promote("admin@example.com", Role::Admin)?;
    let (status, body) = app
        .call(
            Method::POST,
            "/admin/change-role",
            Some(admin_access),
            Some(change),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "moderator");

    let (status, _) = app
        .call(
            Method::POST,
            "/admin/change-role",
            Some(admin_access),
            Some(json!({ "email": "bob@example.com", "new_role": "root" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            Method::POST,
            "/admin/change-role",
            Some(admin_access),
            Some(json!({ "email": "nobody@example.com", "new_role": "guest" })),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn moderator_unlocks_a_locked_account() -> Result<()> {
    let app = test_app()?;
    let (_, moderator) = app.register("mod@example.com", "mod-pw-1").await?;
    app.promote("mod@example.com", Role::Moderator)?;
    app.register("alice@example.com", "correct-pw").await?;

    for _ in 0..5 {
        app.login("alice@example.com", "wrong-pw").await?;
    }
    let (status, _) = app.login("alice@example.com", "correct-pw").await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(
            Method::POST,
            "/admin/unlock",
            Some(token(&moderator, "access_token")?),
            Some(json!({ "email": "alice@example.com" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.login("alice@example.com", "correct-pw").await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn health_and_openapi_are_served() -> Result<()> {
    let app = test_app()?;

    let (status, body) = app.call(Method::GET, "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "none");

    let (status, doc) = app.call(Method::GET, "/openapi.json", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/login"].is_object());
    assert!(doc["paths"]["/refresh-token"].is_object());
    assert!(doc["paths"]["/reset-password"].is_object());
    assert!(doc["components"]["securitySchemes"]["bearer"].is_object());
    Ok(())
}

#[tokio::test]
async fn request_id_is_propagated() -> Result<()> {
    let app = test_app()?;
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())?;
    let response = app.app.clone().oneshot(request).await?;
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("req-42")
    );
    Ok(())
}
