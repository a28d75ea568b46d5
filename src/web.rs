//! HTTP surface: the policy-enforcing middleware plus the login, logout,
//! denial and user list pages.
use crate::access::types::{Decision, RoleSet};
use crate::access::AccessPolicy;
use crate::errors::GateError;
use crate::identity::Identity;
use crate::remember_me::{RememberMeCookie, RememberMeError, UserDirectory};
use crate::session::SessionCookie;
use crate::settings::Settings;
use crate::storage::{self, DbRememberMeService};
use axum::body::Body;
use axum::extract::{Form, Query, State};
use axum::http::header::{SET_COOKIE, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub policy: Arc<AccessPolicy>,
    pub remember_me: Arc<DbRememberMeService>,
}

impl AppState {
    pub fn new(settings: Settings, db: DatabaseConnection, policy: AccessPolicy) -> Self {
        let remember_me = DbRememberMeService::new(
            db.clone(),
            db.clone(),
            settings.remember_me.token_validity_seconds,
        );
        Self {
            settings: Arc::new(settings),
            db,
            policy: Arc::new(policy),
            remember_me: Arc::new(remember_me),
        }
    }
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    // X-Frame-Options: Prevent clickjacking
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );

    // X-Content-Type-Options: Prevent MIME sniffing
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    // Pages are server-rendered forms without scripts
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(
            "default-src 'self'; script-src 'none'; style-src 'self' 'unsafe-inline'; form-action 'self'",
        ),
    );

    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    // Authenticated pages must not be cached by shared proxies
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );

    response
}

/// Build the application router with identity resolution and policy
/// enforcement in front of every route, including the 404 fallback.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/login", get(login_page).post(login_submit))
        .route("/logout", get(logout).post(logout))
        .route("/Access_Denied", get(access_denied))
        .route("/", get(user_list))
        .route("/list", get(user_list))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authorize_request,
        ))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub async fn serve(state: AppState) -> miette::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let app = router(state);

    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

// ============================================================================
// Identity resolution and enforcement
// ============================================================================

/// Outcome of identity resolution for one request.
#[derive(Default)]
struct ResolvedIdentity {
    identity: Option<Identity>,
    /// `Set-Cookie` values to attach to whatever response is produced.
    set_cookies: Vec<String>,
}

/// Resolution failed on the store. Cookies already committed server-side
/// still have to reach the client.
struct ResolveFailure {
    error: GateError,
    set_cookies: Vec<String>,
}

impl From<GateError> for ResolveFailure {
    fn from(error: GateError) -> Self {
        Self {
            error,
            set_cookies: Vec::new(),
        }
    }
}

async fn resolve_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<ResolvedIdentity, ResolveFailure> {
    if let Some(cookie) = SessionCookie::from_headers(headers) {
        if let Some(session) = storage::get_session(&state.db, &cookie.session_id).await? {
            if let Some(identity) = state.db.find_identity(&session.subject).await? {
                return Ok(ResolvedIdentity {
                    identity: Some(identity),
                    set_cookies: Vec::new(),
                });
            }
        }
    }

    let cookie_name = &state.settings.remember_me.cookie_name;
    let Some(raw) = RememberMeCookie::raw_from_headers(headers, cookie_name) else {
        return Ok(ResolvedIdentity::default());
    };
    let clear = || ResolvedIdentity {
        identity: None,
        set_cookies: vec![RememberMeCookie::delete_cookie_header(cookie_name)],
    };

    let Some(presented) = RememberMeCookie::decode(&raw) else {
        tracing::debug!("Malformed remember-me cookie");
        return Ok(clear());
    };

    match state
        .remember_me
        .validate(&presented.series, &presented.token_value)
        .await
    {
        Ok(login) => {
            let now = chrono::Utc::now().timestamp();
            let user_agent = headers
                .get(USER_AGENT)
                .and_then(|h| h.to_str().ok())
                .map(String::from);
            // The token is already rotated in the store from here on.
            let rotated = RememberMeCookie::new(login.token.series, login.token.token_value)
                .to_cookie_header(
                    cookie_name,
                    state.remember_me.validity_secs(),
                    state.settings.secure_cookies(),
                );

            let session = match storage::create_session(
                &state.db,
                &login.identity.user_id,
                now,
                state.settings.login.session_ttl_secs,
                user_agent,
                true,
            )
            .await
            {
                Ok(session) => session,
                Err(error) => {
                    return Err(ResolveFailure {
                        error,
                        set_cookies: vec![rotated],
                    })
                }
            };

            tracing::info!(
                user_id = %login.identity.user_id,
                "Signed in from remember-me cookie"
            );

            Ok(ResolvedIdentity {
                identity: Some(login.identity),
                set_cookies: vec![
                    SessionCookie::new(session.session_id).to_cookie_header(&state.settings),
                    rotated,
                ],
            })
        }
        Err(RememberMeError::StoreUnavailable(e)) => Err(e.into()),
        // The winning request is setting the rotated cookie; leave it alone.
        Err(RememberMeError::Contended) => Ok(ResolvedIdentity::default()),
        Err(e) => {
            tracing::debug!(reason = %e, "Remember-me cookie rejected");
            Ok(clear())
        }
    }
}

async fn authorize_request(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let resolved = match resolve_identity(&state, request.headers()).await {
        Ok(r) => r,
        Err(failure) => return with_cookies(unavailable(&failure.error), &failure.set_cookies),
    };

    let roles = resolved
        .identity
        .as_ref()
        .map(|i| i.roles().clone())
        .unwrap_or_else(RoleSet::new);
    let path = request.uri().path().to_string();

    let response = match (state.policy.evaluate(&path, &roles), resolved.identity) {
        (Decision::Allow, identity) => {
            if let Some(identity) = identity {
                request.extensions_mut().insert(identity);
            }
            next.run(request).await
        }
        (Decision::Deny, None) => {
            let target = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let location = format!(
                "{}?return_to={}",
                state.settings.login.login_page,
                urlencoded(target)
            );
            Redirect::to(&location).into_response()
        }
        (Decision::Deny, Some(identity)) => {
            tracing::info!(
                user = %identity.username,
                path = %path,
                "Access denied"
            );
            Redirect::to(&state.settings.login.access_denied_page).into_response()
        }
    };

    with_cookies(response, &resolved.set_cookies)
}

fn with_cookies(mut response: Response, cookies: &[String]) -> Response {
    for cookie in cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "Dropping unencodable cookie"),
        }
    }
    response
}

fn unavailable(err: &GateError) -> Response {
    tracing::error!(error = %err, "Store unavailable, failing closed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Html(page(
            "Service unavailable",
            "<p>The service is temporarily unavailable. Please try again later.</p>",
        )),
    )
        .into_response()
}

fn request_identity(request: &Request<Body>) -> Option<Identity> {
    request.extensions().get::<Identity>().cloned()
}

// ============================================================================
// Login / logout
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoginQuery {
    return_to: Option<String>,
    error: Option<String>,
    logout: Option<String>,
}

async fn login_page(
    State(state): State<AppState>,
    Query(q): Query<LoginQuery>,
) -> impl IntoResponse {
    let message_html = if let Some(err) = q.error {
        format!("<p class='error'>{}</p>", html_escape(&err))
    } else if q.logout.is_some() {
        "<p class='info'>You have been logged out successfully.</p>".to_string()
    } else {
        String::new()
    };

    let login = &state.settings.login;
    let return_to = html_escape(&q.return_to.unwrap_or_default());
    let action = html_escape(&login.login_page);
    let username_field = html_escape(&login.username_parameter);
    let password_field = html_escape(&login.password_parameter);
    let remember_field = html_escape(&state.settings.remember_me.parameter);

    let body = format!(
        r#"
            <h1>Login</h1>
            {message_html}
            <form method="POST" action="{action}">
                <input type="hidden" name="return_to" value="{return_to}">
                <label>
                    Username:
                    <input type="text" name="{username_field}" required autofocus>
                </label>
                <label>
                    Password:
                    <input type="password" name="{password_field}" required>
                </label>
                <label class="inline">
                    <input type="checkbox" name="{remember_field}"> Remember me
                </label>
                <button type="submit">Log in</button>
            </form>
        "#
    );

    Html(page("Login", &body))
}

fn checkbox_checked(value: Option<&String>) -> bool {
    matches!(
        value.map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("on" | "true" | "1" | "yes")
    )
}

/// Only same-origin absolute paths are followed after login.
fn safe_return_to(return_to: Option<&String>) -> String {
    match return_to {
        Some(target)
            if target.starts_with('/') && !target.starts_with("//") && !target.contains('\\') =>
        {
            target.clone()
        }
        _ => "/".to_string(),
    }
}

async fn login_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let login = &state.settings.login;
    let return_to = safe_return_to(form.get("return_to"));
    let login_error = |message: &str| {
        Redirect::to(&format!(
            "{}?error={}&return_to={}",
            login.login_page,
            urlencoded(message),
            urlencoded(&return_to)
        ))
        .into_response()
    };

    let (Some(username), Some(password)) = (
        form.get(&login.username_parameter),
        form.get(&login.password_parameter),
    ) else {
        return login_error("Username and password are required");
    };

    // Verify credentials
    let subject = match storage::verify_user_password(&state.db, username, password).await {
        Ok(Some(sub)) => sub,
        Ok(None) => {
            tracing::info!(username = %username, "Failed login attempt");
            return login_error("Invalid username or password");
        }
        Err(e) => return unavailable(&e),
    };

    match state.db.find_identity(&subject).await {
        Ok(Some(_)) => {}
        Ok(None) => return login_error("Account has no assigned roles"),
        Err(e) => return unavailable(&e),
    }

    let remember = checkbox_checked(form.get(&state.settings.remember_me.parameter));
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(String::from);

    let now = chrono::Utc::now().timestamp();
    let session = match storage::create_session(
        &state.db,
        &subject,
        now,
        login.session_ttl_secs,
        user_agent,
        remember,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => return unavailable(&e),
    };

    let mut cookies = vec![SessionCookie::new(session.session_id).to_cookie_header(&state.settings)];

    if remember {
        match state.remember_me.issue(&subject).await {
            Ok(issued) => cookies.push(
                RememberMeCookie::new(issued.series, issued.token_value).to_cookie_header(
                    &state.settings.remember_me.cookie_name,
                    state.remember_me.validity_secs(),
                    state.settings.secure_cookies(),
                ),
            ),
            Err(e) => {
                tracing::warn!(error = %e, subject = %subject, "Could not issue remember-me login")
            }
        }
    }

    tracing::info!(username = %username, remember_me = remember, "User logged in");

    with_cookies(Redirect::to(&return_to).into_response(), &cookies)
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(cookie) = SessionCookie::from_headers(&headers) {
        if let Err(e) = storage::delete_session(&state.db, &cookie.session_id).await {
            tracing::warn!(error = %e, "Failed to delete session on logout");
        }
    }

    let cookie_name = &state.settings.remember_me.cookie_name;
    if let Some(presented) = RememberMeCookie::raw_from_headers(&headers, cookie_name)
        .as_deref()
        .and_then(RememberMeCookie::decode)
    {
        if let Err(e) = state.remember_me.invalidate(&presented.series).await {
            tracing::warn!(error = %e, "Failed to remove remember-me login on logout");
        }
    }

    let location = format!("{}?logout", state.settings.login.login_page);
    with_cookies(
        Redirect::to(&location).into_response(),
        &[
            SessionCookie::delete_cookie_header(),
            RememberMeCookie::delete_cookie_header(cookie_name),
        ],
    )
}

// ============================================================================
// Pages
// ============================================================================

async fn access_denied(request: Request<Body>) -> impl IntoResponse {
    let who = request_identity(&request)
        .map(|i| html_escape(&i.username))
        .unwrap_or_else(|| "guest".to_string());

    let body = format!(
        r#"
            <h1>Access denied</h1>
            <p>Dear <strong>{who}</strong>, you are not authorized to access this page.</p>
            <p><a href="/logout">Logout</a></p>
        "#
    );

    (StatusCode::FORBIDDEN, Html(page("Access denied", &body)))
}

async fn user_list(State(state): State<AppState>, request: Request<Body>) -> Response {
    let users = match storage::list_users(&state.db).await {
        Ok(users) => users,
        Err(e) => return unavailable(&e),
    };

    let mut rows = String::new();
    for user in users {
        let roles = match storage::get_roles_for_subject(&state.db, &user.subject).await {
            Ok(roles) => roles
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            Err(e) => return unavailable(&e),
        };
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            html_escape(&user.username),
            html_escape(user.email.as_deref().unwrap_or("")),
            html_escape(&roles),
            if user.enabled == 1 { "yes" } else { "no" },
        ));
    }

    let greeting = request_identity(&request)
        .map(|i| format!("<p>Signed in as <strong>{}</strong></p>", html_escape(&i.username)))
        .unwrap_or_default();

    let body = format!(
        r#"
            <h1>Users</h1>
            {greeting}
            <table>
                <tr><th>Username</th><th>Email</th><th>Roles</th><th>Enabled</th></tr>
                {rows}
            </table>
            <p><a href="/logout">Logout</a></p>
        "#
    );

    Html(page("Users", &body)).into_response()
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Html(page("Not found", "<h1>Not found</h1>")),
    )
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
        <html>
        <head>
            <title>{title}</title>
            <style>
                body {{ font-family: Arial, sans-serif; max-width: 640px; margin: 100px auto; padding: 20px; }}
                h1 {{ color: #333; }}
                label {{ display: block; margin-top: 10px; }}
                label.inline {{ display: inline-block; }}
                input[type="text"], input[type="password"] {{ width: 100%; padding: 8px; margin-top: 5px; box-sizing: border-box; }}
                button {{ margin-top: 20px; padding: 10px 20px; background-color: #007bff; color: white; border: none; cursor: pointer; }}
                table {{ border-collapse: collapse; width: 100%; }}
                td, th {{ border-bottom: 1px solid #ddd; padding: 6px; text-align: left; }}
                .error {{ color: red; }}
                .info {{ color: green; }}
            </style>
        </head>
        <body>
            {body}
        </body>
        </html>
    "#
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn urlencoded(s: &str) -> String {
    serde_urlencoded::to_string([("", s)])
        .unwrap_or_default()
        .trim_start_matches('=')
        .to_string()
}
