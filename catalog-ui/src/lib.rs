// Library interface for catalog-ui

pub mod auth;
pub mod routes;
pub mod templates;

use std::collections::HashMap;

use axum::{
    handler::HandlerWithoutStateExt,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, get_service, post},
    Router,
};
use catalog::CatalogStore;
use circulation::CirculationConfig;
use tera::Tera;
use tower::ServiceBuilder;
use tower_http::{
    services::ServeDir,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: CatalogStore,
    pub circulation: CirculationConfig,
    pub users: HashMap<String, String>,
    pub session_secret: Option<String>,
    pub tera: Tera,
}

impl AppState {
    pub async fn new() -> Self {
        let store = match CatalogStore::from_env() {
            Ok(store) => store,
            Err(e) => {
                warn!("Failed to initialize catalog store ({}), starting empty", e);
                CatalogStore::new()
            }
        };
        Self::with_store(store)
    }

    /// State over an explicit store; environment still supplies the
    /// capability grants, accounts and session secret. Tests overwrite
    /// those fields directly.
    pub fn with_store(store: CatalogStore) -> Self {
        // Load templates using crate-absolute path for deterministic resolution
        let tpl_glob = format!("{}/templates/**/*.html", env!("CARGO_MANIFEST_DIR"));
        let tera = match Tera::new(&tpl_glob) {
            Ok(t) => t,
            Err(e) => {
                error!("Parsing error for Tera templates ({}): {}", tpl_glob, e);
                std::process::exit(1);
            }
        };

        Self {
            store,
            circulation: circulation::capabilities::load_from_env(),
            users: auth::load_users_from_env(),
            session_secret: std::env::var("LIBRARY_SESSION_SECRET").ok(),
            tera,
        }
    }
}

// Custom error type for better error handling
#[derive(Debug)]
pub struct AppError {
    pub status_code: StatusCode,
    pub message: String,
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("Internal server error: {}", err),
        }
    }
}

impl From<tera::Error> for AppError {
    fn from(err: tera::Error) -> Self {
        AppError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("Template rendering error: {}", err),
        }
    }
}

impl From<catalog::StoreError> for AppError {
    fn from(err: catalog::StoreError) -> Self {
        let status_code = match err {
            catalog::StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            catalog::StoreError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status_code,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code, self.message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

// Health check endpoint
async fn health() -> impl IntoResponse {
    "OK"
}

// Fallback handler for 404s
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Html(
            r#"
<!DOCTYPE html>
<html>
<head>
    <title>404 - Not Found</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        .error { color: #d32f2f; }
    </style>
</head>
<body>
    <h1 class="error">404 - Page Not Found</h1>
    <p><a href="/">&larr; Back to the catalog</a></p>
</body>
</html>
    "#,
        ),
    )
}

async fn handle_static_file_error() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Static file not found").into_response()
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(routes::index_html))
        // Catalog browsing
        .route("/books", get(routes::list_books_html))
        .route("/books/:book_id", get(routes::get_book_html))
        .route("/authors", get(routes::list_authors_html))
        .route("/authors/:author_id", get(routes::get_author_html))
        // Loans
        .route("/loans", get(routes::all_loans_html))
        .route("/loans/mine", get(routes::my_loans_html))
        .route(
            "/loans/:copy_id/renew",
            get(routes::renew_form_html).post(routes::renew_submit),
        )
        .route("/loans/:copy_id/return", post(routes::return_copy))
        // Record maintenance
        .route(
            "/authors/new",
            get(routes::author_new_form).post(routes::author_create),
        )
        .route(
            "/authors/:author_id/edit",
            get(routes::author_edit_form).post(routes::author_update),
        )
        .route(
            "/authors/:author_id/delete",
            get(routes::author_delete_form).post(routes::author_delete),
        )
        .route(
            "/books/new",
            get(routes::book_new_form).post(routes::book_create),
        )
        .route(
            "/books/:book_id/edit",
            get(routes::book_edit_form).post(routes::book_update),
        )
        .route(
            "/books/:book_id/delete",
            get(routes::book_delete_form).post(routes::book_delete),
        )
        // Sessions
        .route("/login", get(routes::login_form).post(routes::login_submit))
        .route("/logout", post(routes::logout))
        // JSON API mirrors
        .route("/api/books", get(routes::list_books_api))
        .route("/api/books/:book_id", get(routes::get_book_api))
        .route("/api/authors", get(routes::list_authors_api))
        .route("/api/authors/:author_id", get(routes::get_author_api))
        .route("/api/loans", get(routes::all_loans_api))
        .route(
            "/static/*path",
            get_service(
                ServeDir::new("static").not_found_service(handle_static_file_error.into_service()),
            ),
        )
        .fallback(not_found)
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::default().include_headers(true)),
            ),
        )
        .with_state(state)
}
