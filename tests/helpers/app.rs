use super::TestDb;
use axum::body::Body;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, Request, Response};
use axum::Router;
use rolegate::access::loader::builtin_policy;
use rolegate::remember_me::RememberMeCookie;
use rolegate::settings::Settings;
use rolegate::web::{self, AppState};
use sea_orm::DatabaseConnection;
use tower::ServiceExt;

/// The full router over a fresh database, using the built-in rules.
pub struct TestApp {
    pub db: TestDb,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_settings(Settings::default()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        let db = TestDb::new().await;
        let policy = builtin_policy().expect("Built-in policy must compile");
        let state = AppState::new(settings, db.connection().clone(), policy);
        Self { db, state }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.db.connection()
    }

    pub fn router(&self) -> Router {
        web::router(self.state.clone())
    }

    pub async fn get(&self, uri: &str, cookies: &[String]) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if !cookies.is_empty() {
            builder = builder.header(COOKIE, cookies.join("; "));
        }
        self.router()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn post_form(&self, uri: &str, form: &[(&str, &str)]) -> Response<Body> {
        let body = serde_urlencoded::to_string(form).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.router().oneshot(request).await.unwrap()
    }
}

/// All `Set-Cookie` values of a response.
pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// `name=value` pairs from `Set-Cookie` values, skipping deletions, ready
/// to be sent back in a `Cookie` header.
pub fn cookie_pairs(headers: &HeaderMap) -> Vec<String> {
    set_cookies(headers)
        .into_iter()
        .filter(|c| !c.contains("Max-Age=0"))
        .filter_map(|c| c.split(';').next().map(str::to_string))
        .collect()
}

/// The remember-me cookie set by a response, decoded.
pub fn remember_me_cookie(headers: &HeaderMap, name: &str) -> Option<RememberMeCookie> {
    cookie_pairs(headers).into_iter().find_map(|pair| {
        let value = pair.strip_prefix(&format!("{}=", name))?.to_string();
        RememberMeCookie::decode(&value)
    })
}
