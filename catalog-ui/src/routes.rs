use crate::auth::{self, AuthError, Claims};
use crate::templates::{AuthorVm, BookVm, CopyVm, PaginationVm};
use crate::{AppError, AppState};

use axum::http::{header::SET_COOKIE, HeaderMap, StatusCode};
use axum::{
    extract::{Path, Query, State},
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
    Form, Json,
};
use chrono::NaiveDate;
use circulation::{RenewalError, RenewalOutcome, CAP_EDIT_CATALOG, CAP_MARK_RETURNED};
use serde::Deserialize;
use tracing::{debug, error, info};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

// Query parameters for paginated list pages
#[derive(Deserialize, Debug, Clone)]
pub struct ListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LoginQuery {
    pub next: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub next: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct RenewForm {
    pub due_back: String,
}

#[derive(Deserialize, Debug)]
pub struct AuthorForm {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub date_of_death: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct BookForm {
    pub title: String,
    pub author_id: u64,
    pub summary: String,
    pub isbn: String,
    pub genre_ids: Option<String>,
}

fn render_template(state: &AppState, name: &str, context: &tera::Context) -> Html<String> {
    let html = state
        .tera
        .render(name, context)
        .map_err(|e| {
            error!("Template rendering failed: {}", e);
            AppError::from(e)
        })
        .unwrap_or_else(|e| {
            error!(
                "Failed to render error page after template rendering failure: {}",
                e
            );
            // Fallback to a simple error message if rendering the error page also fails
            format!(
                "<h1>Internal Server Error</h1><p>Failed to render page: {}</p>",
                e
            )
        });
    Html(html)
}

fn not_found_page(state: &AppState, what: &str) -> Response {
    let mut context = base_context(None);
    context.insert("what", what);
    (
        StatusCode::NOT_FOUND,
        render_template(state, "not_found.html", &context),
    )
        .into_response()
}

fn forbidden_page(state: &AppState, user: &str) -> Response {
    let context = base_context(Some(user.to_string()));
    (
        StatusCode::FORBIDDEN,
        render_template(state, "forbidden.html", &context),
    )
        .into_response()
}

fn base_context(user: Option<String>) -> tera::Context {
    let mut context = tera::Context::new();
    context.insert("user", &user);
    // Base navigation reads this; pages that belong to a section overwrite it.
    context.insert("current_page", &"");
    context
}

fn optional_user(state: &AppState, headers: &HeaderMap) -> Option<String> {
    auth::current_session(headers, state.session_secret.as_deref())
        .ok()
        .map(|c| c.sub)
}

/// Session gate for HTML pages: unauthenticated visitors land on /login.
fn require_page_session(
    state: &AppState,
    headers: &HeaderMap,
    next: &str,
) -> Result<Claims, Response> {
    auth::current_session(headers, state.session_secret.as_deref())
        .map_err(|e| e.into_page_response(next))
}

fn page_size(query: &ListQuery) -> usize {
    query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Home page: collection counts plus a per-session visit counter.
#[axum::debug_handler]
pub async fn index_html(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let counts = state.store.counts().await;

    let num_visits: usize = auth::cookie_value(&headers, "visits")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut context = base_context(optional_user(&state, &headers));
    context.insert("counts", &counts);
    context.insert("num_visits", &num_visits);
    context.insert("current_page", &"index");

    let html = render_template(&state, "index.html", &context);
    (
        AppendHeaders([(
            SET_COOKIE,
            format!("visits={}; Path=/; SameSite=Lax", num_visits + 1),
        )]),
        html,
    )
        .into_response()
}

/// Book list - HTML response
#[axum::debug_handler]
pub async fn list_books_html(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    debug!("Handling HTML book list: {:?}", query);
    let per_page = page_size(&query);
    let page = query.page.unwrap_or(1).max(1);
    let (books, total) = state.store.list_books(page, per_page).await;

    let mut vms = Vec::with_capacity(books.len());
    for book in &books {
        let author = state.store.get_author(book.author_id).await.ok();
        vms.push(BookVm::new(book, author.as_ref()));
    }

    let mut context = base_context(optional_user(&state, &headers));
    context.insert("books", &vms);
    context.insert("pagination", &PaginationVm::new(page, per_page, total));
    context.insert("current_page", &"books");

    render_template(&state, "book_list.html", &context).into_response()
}

/// Book detail - HTML response
#[axum::debug_handler]
pub async fn get_book_html(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<u64>,
) -> Response {
    let book = match state.store.get_book(book_id).await {
        Ok(book) => book,
        Err(_) => return not_found_page(&state, "book"),
    };
    let author = state.store.get_author(book.author_id).await.ok();
    let genres = state.store.genre_names(&book.genre_ids).await;
    let copies = state.store.copies_of_book(book_id).await;
    let today = chrono::Utc::now().date_naive();
    let copy_vms: Vec<CopyVm> = copies
        .iter()
        .map(|c| CopyVm::new(c, &book.title, today))
        .collect();

    let mut context = base_context(optional_user(&state, &headers));
    context.insert("book", &book);
    context.insert(
        "author",
        &author.as_ref().map(|a| AuthorVm::new(a)),
    );
    context.insert("genres", &genres);
    context.insert("copies", &copy_vms);
    context.insert("current_page", &"books");

    render_template(&state, "book_detail.html", &context).into_response()
}

/// Author list - HTML response
#[axum::debug_handler]
pub async fn list_authors_html(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let per_page = page_size(&query);
    let page = query.page.unwrap_or(1).max(1);
    let (authors, total) = state.store.list_authors(page, per_page).await;
    let vms: Vec<AuthorVm> = authors.iter().map(AuthorVm::new).collect();

    let mut context = base_context(optional_user(&state, &headers));
    context.insert("authors", &vms);
    context.insert("pagination", &PaginationVm::new(page, per_page, total));
    context.insert("current_page", &"authors");

    render_template(&state, "author_list.html", &context).into_response()
}

/// Author detail - HTML response
#[axum::debug_handler]
pub async fn get_author_html(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(author_id): Path<u64>,
) -> Response {
    let author = match state.store.get_author(author_id).await {
        Ok(author) => author,
        Err(_) => return not_found_page(&state, "author"),
    };
    let books = state.store.books_by_author(author_id).await;
    let book_vms: Vec<BookVm> = books.iter().map(|b| BookVm::new(b, Some(&author))).collect();

    let mut context = base_context(optional_user(&state, &headers));
    context.insert("author", &AuthorVm::new(&author));
    context.insert("books", &book_vms);
    context.insert("current_page", &"authors");

    render_template(&state, "author_detail.html", &context).into_response()
}

async fn copy_vms_with_titles(state: &AppState, copies: &[catalog::BookInstance]) -> Vec<CopyVm> {
    let today = chrono::Utc::now().date_naive();
    let mut vms = Vec::with_capacity(copies.len());
    for copy in copies {
        let title = state
            .store
            .get_book(copy.book_id)
            .await
            .map(|b| b.title)
            .unwrap_or_else(|_| "Unknown title".to_string());
        vms.push(CopyVm::new(copy, &title, today));
    }
    vms
}

/// Copies on loan to the signed-in borrower.
#[axum::debug_handler]
pub async fn my_loans_html(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match require_page_session(&state, &headers, "/loans/mine") {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    let loans = state.store.loans_for_borrower(&claims.sub).await;
    let vms = copy_vms_with_titles(&state, &loans).await;

    let mut context = base_context(Some(claims.sub));
    context.insert("loans", &vms);
    context.insert("current_page", &"my-loans");

    render_template(&state, "my_loans.html", &context).into_response()
}

/// Every copy on loan. Staff only.
#[axum::debug_handler]
pub async fn all_loans_html(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match require_page_session(&state, &headers, "/loans") {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    if !state.circulation.has_capability(&claims.sub, CAP_MARK_RETURNED) {
        return forbidden_page(&state, &claims.sub);
    }
    let loans = state.store.all_loans().await;
    let vms = copy_vms_with_titles(&state, &loans).await;

    let mut context = base_context(Some(claims.sub));
    context.insert("loans", &vms);
    context.insert("current_page", &"all-loans");

    render_template(&state, "all_loans.html", &context).into_response()
}

fn renewal_error_response(state: &AppState, actor: &str, err: RenewalError) -> Response {
    match err {
        RenewalError::NotFound(_) => not_found_page(state, "loan record"),
        RenewalError::PermissionDenied(_) => forbidden_page(state, actor),
        RenewalError::Store(e) => AppError::from(e).into_response(),
    }
}

fn renewal_form_page(
    state: &AppState,
    actor: &str,
    loan: &catalog::BookInstance,
    book_title: &str,
    date_value: &str,
    error: Option<&str>,
) -> Response {
    let today = chrono::Utc::now().date_naive();
    let mut context = base_context(Some(actor.to_string()));
    context.insert("copy", &CopyVm::new(loan, book_title, today));
    context.insert("date_value", &date_value);
    context.insert("error", &error);
    context.insert("current_page", &"all-loans");
    render_template(state, "renew_form.html", &context).into_response()
}

/// Renewal form - GET shows the policy default proposal.
#[axum::debug_handler]
pub async fn renew_form_html(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(copy_id): Path<Uuid>,
) -> Response {
    let claims = match require_page_session(&state, &headers, &format!("/loans/{}/renew", copy_id))
    {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };

    match circulation::renew(&state.store, &state.circulation, copy_id, &claims.sub, None).await {
        Ok(RenewalOutcome::Render { loan, form }) => {
            let title = book_title_for(&state, loan.book_id).await;
            renewal_form_page(
                &state,
                &claims.sub,
                &loan,
                &title,
                &form.proposed.format("%Y-%m-%d").to_string(),
                form.error.as_deref(),
            )
        }
        // A GET never submits a date, so a commit outcome cannot happen;
        // treat it as an internal error if it ever does.
        Ok(RenewalOutcome::Committed { .. }) => AppError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            message: "unexpected commit without a submitted date".to_string(),
        }
        .into_response(),
        Err(e) => renewal_error_response(&state, &claims.sub, e),
    }
}

async fn book_title_for(state: &AppState, book_id: u64) -> String {
    state
        .store
        .get_book(book_id)
        .await
        .map(|b| b.title)
        .unwrap_or_else(|_| "Unknown title".to_string())
}

/// Renewal form - POST submits a proposed due-back date.
#[axum::debug_handler]
pub async fn renew_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(copy_id): Path<Uuid>,
    Form(form): Form<RenewForm>,
) -> Response {
    let claims = match require_page_session(&state, &headers, &format!("/loans/{}/renew", copy_id))
    {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };

    let submitted = match NaiveDate::parse_from_str(form.due_back.trim(), "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => {
            // Unparseable input never reaches the workflow; re-present the
            // form with the raw value, the same way a rejected date comes back.
            return match circulation::renew(
                &state.store,
                &state.circulation,
                copy_id,
                &claims.sub,
                None,
            )
            .await
            {
                Ok(RenewalOutcome::Render { loan, .. }) => {
                    let title = book_title_for(&state, loan.book_id).await;
                    renewal_form_page(
                        &state,
                        &claims.sub,
                        &loan,
                        &title,
                        form.due_back.trim(),
                        Some("Enter a valid date (YYYY-MM-DD)"),
                    )
                }
                Ok(RenewalOutcome::Committed { .. }) => AppError {
                    status_code: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "unexpected commit without a submitted date".to_string(),
                }
                .into_response(),
                Err(e) => renewal_error_response(&state, &claims.sub, e),
            };
        }
    };

    match circulation::renew(
        &state.store,
        &state.circulation,
        copy_id,
        &claims.sub,
        Some(submitted),
    )
    .await
    {
        Ok(RenewalOutcome::Committed { loan, redirect }) => {
            info!(
                "Loan {} renewed until {:?} by {}",
                loan.id, loan.due_back, claims.sub
            );
            Redirect::to(redirect).into_response()
        }
        Ok(RenewalOutcome::Render { loan, form }) => {
            let title = book_title_for(&state, loan.book_id).await;
            renewal_form_page(
                &state,
                &claims.sub,
                &loan,
                &title,
                &form.proposed.format("%Y-%m-%d").to_string(),
                form.error.as_deref(),
            )
        }
        Err(e) => renewal_error_response(&state, &claims.sub, e),
    }
}

/// Mark a copy returned. Staff only.
#[axum::debug_handler]
pub async fn return_copy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(copy_id): Path<Uuid>,
) -> Response {
    let claims = match require_page_session(&state, &headers, "/loans") {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    match circulation::mark_returned(&state.store, &state.circulation, copy_id, &claims.sub).await
    {
        Ok(_) => Redirect::to("/loans").into_response(),
        Err(e) => renewal_error_response(&state, &claims.sub, e),
    }
}

// ---------------------------------------------------------------------------
// Record maintenance (staff with catalog:edit)

fn require_editor(state: &AppState, headers: &HeaderMap, next: &str) -> Result<Claims, Response> {
    let claims = require_page_session(state, headers, next)?;
    if !state.circulation.has_capability(&claims.sub, CAP_EDIT_CATALOG) {
        return Err(forbidden_page(state, &claims.sub));
    }
    Ok(claims)
}

fn parse_optional_date(value: &Option<String>) -> Result<Option<NaiveDate>, String> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("'{}' is not a valid date (YYYY-MM-DD)", raw)),
    }
}

fn author_form_page(
    state: &AppState,
    user: &str,
    heading: &str,
    action: &str,
    form: Option<&AuthorForm>,
    error: Option<String>,
) -> Response {
    let mut context = base_context(Some(user.to_string()));
    context.insert("heading", heading);
    context.insert("action", action);
    context.insert("first_name", &form.map(|f| f.first_name.as_str()).unwrap_or(""));
    context.insert("last_name", &form.map(|f| f.last_name.as_str()).unwrap_or(""));
    context.insert(
        "date_of_birth",
        &form.and_then(|f| f.date_of_birth.as_deref()).unwrap_or(""),
    );
    context.insert(
        "date_of_death",
        &form.and_then(|f| f.date_of_death.as_deref()).unwrap_or(""),
    );
    context.insert("error", &error);
    context.insert("current_page", &"authors");
    render_template(state, "author_form.html", &context).into_response()
}

#[axum::debug_handler]
pub async fn author_new_form(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match require_editor(&state, &headers, "/authors/new") {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    author_form_page(&state, &claims.sub, "New author", "/authors/new", None, None)
}

#[axum::debug_handler]
pub async fn author_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AuthorForm>,
) -> Response {
    let claims = match require_editor(&state, &headers, "/authors/new") {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };

    let (born, died) = match (
        parse_optional_date(&form.date_of_birth),
        parse_optional_date(&form.date_of_death),
    ) {
        (Ok(born), Ok(died)) => (born, died),
        (Err(e), _) | (_, Err(e)) => {
            return author_form_page(
                &state,
                &claims.sub,
                "New author",
                "/authors/new",
                Some(&form),
                Some(e),
            )
        }
    };

    match state
        .store
        .create_author(form.first_name.clone(), form.last_name.clone(), born, died)
        .await
    {
        Ok(author) => Redirect::to(&format!("/authors/{}", author.id)).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

#[axum::debug_handler]
pub async fn author_edit_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(author_id): Path<u64>,
) -> Response {
    let claims = match require_editor(&state, &headers, &format!("/authors/{}/edit", author_id)) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    let author = match state.store.get_author(author_id).await {
        Ok(author) => author,
        Err(_) => return not_found_page(&state, "author"),
    };
    let form = AuthorForm {
        first_name: author.first_name.clone(),
        last_name: author.last_name.clone(),
        date_of_birth: author.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
        date_of_death: author.date_of_death.map(|d| d.format("%Y-%m-%d").to_string()),
    };
    author_form_page(
        &state,
        &claims.sub,
        "Update author",
        &format!("/authors/{}/edit", author_id),
        Some(&form),
        None,
    )
}

#[axum::debug_handler]
pub async fn author_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(author_id): Path<u64>,
    Form(form): Form<AuthorForm>,
) -> Response {
    let action = format!("/authors/{}/edit", author_id);
    let claims = match require_editor(&state, &headers, &action) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };

    let (born, died) = match (
        parse_optional_date(&form.date_of_birth),
        parse_optional_date(&form.date_of_death),
    ) {
        (Ok(born), Ok(died)) => (born, died),
        (Err(e), _) | (_, Err(e)) => {
            return author_form_page(&state, &claims.sub, "Update author", &action, Some(&form), Some(e))
        }
    };

    let author = catalog::Author {
        id: author_id,
        first_name: form.first_name.clone(),
        last_name: form.last_name.clone(),
        date_of_birth: born,
        date_of_death: died,
    };
    match state.store.update_author(author).await {
        Ok(author) => Redirect::to(&format!("/authors/{}", author.id)).into_response(),
        Err(catalog::StoreError::NotFound(_)) => not_found_page(&state, "author"),
        Err(e) => AppError::from(e).into_response(),
    }
}

fn confirm_delete_page(
    state: &AppState,
    user: &str,
    what: &str,
    name: &str,
    action: &str,
    error: Option<String>,
) -> Response {
    let mut context = base_context(Some(user.to_string()));
    context.insert("what", what);
    context.insert("name", name);
    context.insert("action", action);
    context.insert("error", &error);
    render_template(state, "confirm_delete.html", &context).into_response()
}

#[axum::debug_handler]
pub async fn author_delete_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(author_id): Path<u64>,
) -> Response {
    let action = format!("/authors/{}/delete", author_id);
    let claims = match require_editor(&state, &headers, &action) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    let author = match state.store.get_author(author_id).await {
        Ok(author) => author,
        Err(_) => return not_found_page(&state, "author"),
    };
    confirm_delete_page(
        &state,
        &claims.sub,
        "author",
        &author.display_name(),
        &action,
        None,
    )
}

#[axum::debug_handler]
pub async fn author_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(author_id): Path<u64>,
) -> Response {
    let action = format!("/authors/{}/delete", author_id);
    let claims = match require_editor(&state, &headers, &action) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    match state.store.delete_author(author_id).await {
        Ok(()) => Redirect::to("/authors").into_response(),
        Err(catalog::StoreError::NotFound(_)) => not_found_page(&state, "author"),
        Err(catalog::StoreError::Conflict(reason)) => {
            let name = state
                .store
                .get_author(author_id)
                .await
                .map(|a| a.display_name())
                .unwrap_or_default();
            confirm_delete_page(&state, &claims.sub, "author", &name, &action, Some(reason))
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

fn book_form_page(
    state: &AppState,
    user: &str,
    heading: &str,
    action: &str,
    form: Option<&BookForm>,
    error: Option<String>,
) -> Response {
    let mut context = base_context(Some(user.to_string()));
    context.insert("heading", heading);
    context.insert("action", action);
    context.insert("title", &form.map(|f| f.title.as_str()).unwrap_or(""));
    context.insert(
        "author_id",
        &form.map(|f| f.author_id.to_string()).unwrap_or_default(),
    );
    context.insert("summary", &form.map(|f| f.summary.as_str()).unwrap_or(""));
    context.insert("isbn", &form.map(|f| f.isbn.as_str()).unwrap_or(""));
    context.insert(
        "genre_ids",
        &form.and_then(|f| f.genre_ids.as_deref()).unwrap_or(""),
    );
    context.insert("error", &error);
    context.insert("current_page", &"books");
    render_template(state, "book_form.html", &context).into_response()
}

fn parse_genre_ids(raw: &Option<String>) -> Result<Vec<u64>, String> {
    let Some(raw) = raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| format!("'{}' is not a genre id", part.trim()))
        })
        .collect()
}

#[axum::debug_handler]
pub async fn book_new_form(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match require_editor(&state, &headers, "/books/new") {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    book_form_page(&state, &claims.sub, "New book", "/books/new", None, None)
}

#[axum::debug_handler]
pub async fn book_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<BookForm>,
) -> Response {
    let claims = match require_editor(&state, &headers, "/books/new") {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    let genre_ids = match parse_genre_ids(&form.genre_ids) {
        Ok(ids) => ids,
        Err(e) => {
            return book_form_page(&state, &claims.sub, "New book", "/books/new", Some(&form), Some(e))
        }
    };
    match state
        .store
        .create_book(
            form.title.clone(),
            form.author_id,
            form.summary.clone(),
            form.isbn.clone(),
            genre_ids,
        )
        .await
    {
        Ok(book) => Redirect::to(&format!("/books/{}", book.id)).into_response(),
        Err(catalog::StoreError::NotFound(what)) => book_form_page(
            &state,
            &claims.sub,
            "New book",
            "/books/new",
            Some(&form),
            Some(format!("{} does not exist", what)),
        ),
        Err(e) => AppError::from(e).into_response(),
    }
}

#[axum::debug_handler]
pub async fn book_edit_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<u64>,
) -> Response {
    let action = format!("/books/{}/edit", book_id);
    let claims = match require_editor(&state, &headers, &action) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    let book = match state.store.get_book(book_id).await {
        Ok(book) => book,
        Err(_) => return not_found_page(&state, "book"),
    };
    let form = BookForm {
        title: book.title.clone(),
        author_id: book.author_id,
        summary: book.summary.clone(),
        isbn: book.isbn.clone(),
        genre_ids: Some(
            book.genre_ids
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        ),
    };
    book_form_page(&state, &claims.sub, "Update book", &action, Some(&form), None)
}

#[axum::debug_handler]
pub async fn book_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<u64>,
    Form(form): Form<BookForm>,
) -> Response {
    let action = format!("/books/{}/edit", book_id);
    let claims = match require_editor(&state, &headers, &action) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    let genre_ids = match parse_genre_ids(&form.genre_ids) {
        Ok(ids) => ids,
        Err(e) => {
            return book_form_page(&state, &claims.sub, "Update book", &action, Some(&form), Some(e))
        }
    };
    let book = catalog::Book {
        id: book_id,
        title: form.title.clone(),
        author_id: form.author_id,
        summary: form.summary.clone(),
        isbn: form.isbn.clone(),
        genre_ids,
    };
    match state.store.update_book(book).await {
        Ok(book) => Redirect::to(&format!("/books/{}", book.id)).into_response(),
        Err(catalog::StoreError::NotFound(_)) => not_found_page(&state, "book"),
        Err(e) => AppError::from(e).into_response(),
    }
}

#[axum::debug_handler]
pub async fn book_delete_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<u64>,
) -> Response {
    let action = format!("/books/{}/delete", book_id);
    let claims = match require_editor(&state, &headers, &action) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    let book = match state.store.get_book(book_id).await {
        Ok(book) => book,
        Err(_) => return not_found_page(&state, "book"),
    };
    confirm_delete_page(&state, &claims.sub, "book", &book.title, &action, None)
}

#[axum::debug_handler]
pub async fn book_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<u64>,
) -> Response {
    let action = format!("/books/{}/delete", book_id);
    let claims = match require_editor(&state, &headers, &action) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    match state.store.delete_book(book_id).await {
        Ok(()) => Redirect::to("/books").into_response(),
        Err(catalog::StoreError::NotFound(_)) => not_found_page(&state, "book"),
        Err(catalog::StoreError::Conflict(reason)) => {
            let title = state
                .store
                .get_book(book_id)
                .await
                .map(|b| b.title)
                .unwrap_or_default();
            confirm_delete_page(&state, &claims.sub, "book", &title, &action, Some(reason))
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Sessions

/// Only redirect to local paths after login; anything else goes home.
fn sanitize_next(next: Option<&str>) -> String {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path.to_string(),
        _ => "/".to_string(),
    }
}

#[axum::debug_handler]
pub async fn login_form(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Response {
    let mut context = base_context(None);
    context.insert("next", &query.next);
    context.insert("error", &Option::<String>::None);
    render_template(&state, "login.html", &context).into_response()
}

#[axum::debug_handler]
pub async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Response {
    if !auth::verify_password(&state.users, &form.username, &form.password) {
        info!("Rejected login for {}", form.username);
        let mut context = base_context(None);
        context.insert("next", &form.next);
        context.insert("error", &Some("Wrong login or password".to_string()));
        return (
            StatusCode::UNAUTHORIZED,
            render_template(&state, "login.html", &context),
        )
            .into_response();
    }

    let Some(secret) = state.session_secret.as_deref() else {
        return AuthError::ConfigurationError.into_response();
    };
    match auth::issue_session(secret, &form.username) {
        Ok(token) => {
            info!("Login for {}", form.username);
            (
                AppendHeaders([(SET_COOKIE, auth::session_cookie(&token))]),
                Redirect::to(&sanitize_next(form.next.as_deref())),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[axum::debug_handler]
pub async fn logout(State(_state): State<AppState>) -> Response {
    (
        AppendHeaders([(SET_COOKIE, auth::clear_session_cookie())]),
        Redirect::to("/"),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// JSON API mirrors

fn validate_api_limit(limit: Option<usize>) -> Result<(), Response> {
    if let Some(limit) = limit {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": format!("invalid 'limit': must be 1..={}", MAX_PAGE_SIZE)
                })),
            )
                .into_response());
        }
    }
    Ok(())
}

/// Book list - JSON API response
#[axum::debug_handler]
pub async fn list_books_api(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    debug!("Handling JSON API book list: {:?}", query);
    if let Err(resp) = validate_api_limit(query.limit) {
        return resp;
    }
    let per_page = page_size(&query);
    let page = query.page.unwrap_or(1).max(1);
    let (books, total) = state.store.list_books(page, per_page).await;

    let mut items = Vec::with_capacity(books.len());
    for book in &books {
        let author = state.store.get_author(book.author_id).await.ok();
        items.push(BookVm::new(book, author.as_ref()));
    }
    Json(serde_json::json!({ "books": items, "total": total })).into_response()
}

/// Book detail - JSON API response
#[axum::debug_handler]
pub async fn get_book_api(State(state): State<AppState>, Path(book_id): Path<u64>) -> Response {
    match state.store.get_book(book_id).await {
        Ok(book) => {
            let copies = state.store.copies_of_book(book_id).await;
            Json(serde_json::json!({ "book": book, "copies": copies })).into_response()
        }
        Err(catalog::StoreError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "Book not found",
                "bookId": book_id
            })),
        )
            .into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

/// Author list - JSON API response
#[axum::debug_handler]
pub async fn list_authors_api(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    if let Err(resp) = validate_api_limit(query.limit) {
        return resp;
    }
    let per_page = page_size(&query);
    let page = query.page.unwrap_or(1).max(1);
    let (authors, total) = state.store.list_authors(page, per_page).await;
    let items: Vec<AuthorVm> = authors.iter().map(AuthorVm::new).collect();
    Json(serde_json::json!({ "authors": items, "total": total })).into_response()
}

/// Author detail - JSON API response
#[axum::debug_handler]
pub async fn get_author_api(
    State(state): State<AppState>,
    Path(author_id): Path<u64>,
) -> Response {
    match state.store.get_author(author_id).await {
        Ok(author) => {
            let books = state.store.books_by_author(author_id).await;
            Json(serde_json::json!({ "author": author, "books": books })).into_response()
        }
        Err(catalog::StoreError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "Author not found",
                "authorId": author_id
            })),
        )
            .into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

/// Every copy on loan - JSON API response. Staff only.
#[axum::debug_handler]
pub async fn all_loans_api(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match auth::current_session(&headers, state.session_secret.as_deref()) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };
    if !state.circulation.has_capability(&claims.sub, CAP_MARK_RETURNED) {
        return AuthError::Forbidden { actor: claims.sub }.into_response();
    }
    let loans = state.store.all_loans().await;
    let vms = copy_vms_with_titles(&state, &loans).await;
    Json(vms).into_response()
}
