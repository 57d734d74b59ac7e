use catalog::{BookInstance, CatalogStore, LoanStatus};
use catalog_ui::{auth, create_app, AppState};
use circulation::{CirculationConfig, CAP_EDIT_CATALOG, CAP_MARK_RETURNED};
use reqwest::{redirect, StatusCode};
use tokio::task;
use uuid::Uuid;

const SECRET: &str = "spec-secret";

async fn seeded_store() -> CatalogStore {
    let store = CatalogStore::new();
    let author = store
        .create_author("Patrick".into(), "Rothfuss".into(), None, None)
        .await
        .unwrap();
    let book = store
        .create_book(
            "The Name of the Wind".into(),
            author.id,
            "A hero tells his story.".into(),
            "978-1".into(),
            vec![],
        )
        .await
        .unwrap();
    store
        .insert_copy(BookInstance {
            id: Uuid::new_v4(),
            book_id: book.id,
            imprint: "DAW Books, 2007.".into(),
            status: LoanStatus::Available,
            due_back: None,
            borrower: None,
        })
        .await
        .unwrap();
    store
}

fn test_state(store: CatalogStore) -> AppState {
    let mut state = AppState::with_store(store);
    state.circulation = CirculationConfig::default()
        .grant("librarian", CAP_MARK_RETURNED)
        .grant("librarian", CAP_EDIT_CATALOG);
    state.users = [
        ("librarian".to_string(), auth::password_digest("shelves")),
        ("reader".to_string(), auth::password_digest("paperback")),
    ]
    .into_iter()
    .collect();
    state.session_secret = Some(SECRET.to_string());
    state
}

async fn start_ui(state: AppState) -> u16 {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = create_app(state);
    task::spawn(async move { axum::serve(listener, app).await.unwrap() });
    port
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap()
}

fn session_cookie_for(user: &str) -> String {
    let token = auth::issue_session(SECRET, user).unwrap();
    format!("{}={}", auth::SESSION_COOKIE, token)
}

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let port = start_ui(test_state(CatalogStore::new())).await;
    let resp = client()
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn index_shows_counts_and_increments_visits() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let c = client();

    let resp = c
        .get(format!("http://127.0.0.1:{}/", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("visits=1"));
    let body = resp.text().await.unwrap();
    assert!(body.contains("<strong>Books:</strong> 1"));
    assert!(body.contains("visited this page 0 time"));

    let resp = c
        .get(format!("http://127.0.0.1:{}/", port))
        .header("cookie", "visits=4")
        .send()
        .await
        .unwrap();
    let body = resp.text().await.unwrap();
    assert!(body.contains("visited this page 4 times"));
}

#[tokio::test]
async fn book_list_and_detail_render() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let c = client();

    let body = c
        .get(format!("http://127.0.0.1:{}/books", port))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("The Name of the Wind"));
    assert!(body.contains("Rothfuss, Patrick"));

    let body = c
        .get(format!("http://127.0.0.1:{}/books/1", port))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("DAW Books, 2007."));
    assert!(body.contains("Available"));
}

#[tokio::test]
async fn unknown_book_is_404() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let resp = client()
        .get(format!("http://127.0.0.1:{}/books/999", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_route_falls_back_to_404_page() {
    let port = start_ui(test_state(CatalogStore::new())).await;
    let resp = client()
        .get(format!("http://127.0.0.1:{}/nonexistent", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_list_validates_limit() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let c = client();

    let resp = c
        .get(format!("http://127.0.0.1:{}/api/books?limit=0", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = c
        .get(format!("http://127.0.0.1:{}/api/books?limit=101", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = c
        .get(format!("http://127.0.0.1:{}/api/books?limit=10", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["books"][0]["title"], "The Name of the Wind");
}

#[tokio::test]
async fn api_list_survives_hostile_page_numbers() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let c = client();

    // usize::MAX as a query value; paging math must not overflow.
    let resp = c
        .get(format!(
            "http://127.0.0.1:{}/api/books?page=18446744073709551615",
            port
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["books"].as_array().unwrap().len(), 0);

    let resp = c
        .get(format!(
            "http://127.0.0.1:{}/books?page=18446744073709551615",
            port
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_book_not_found_is_json_404() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let resp = client()
        .get(format!("http://127.0.0.1:{}/api/books/999", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Book not found");
}

#[tokio::test]
async fn login_issues_session_cookie_and_redirects() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let c = client();

    let resp = c
        .post(format!("http://127.0.0.1:{}/login", port))
        .form(&[
            ("username", "librarian"),
            ("password", "shelves"),
            ("next", "/loans"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers().get("location").unwrap(), "/loans");
    let cookie = resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with(auth::SESSION_COOKIE));

    // The cookie authenticates a staff-only page.
    let session = cookie.split(';').next().unwrap().to_string();
    let resp = c
        .get(format!("http://127.0.0.1:{}/loans", port))
        .header("cookie", session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let resp = client()
        .post(format!("http://127.0.0.1:{}/login", port))
        .form(&[("username", "librarian"), ("password", "wrong")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.text().await.unwrap().contains("Wrong login or password"));
}

#[tokio::test]
async fn loans_pages_require_login() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let c = client();

    for path in ["/loans", "/loans/mine"] {
        let resp = c
            .get(format!("http://127.0.0.1:{}{}", port, path))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER, "{} should redirect", path);
        let location = resp.headers().get("location").unwrap().to_str().unwrap();
        assert!(location.starts_with("/login"), "{} -> {}", path, location);
    }
}

#[tokio::test]
async fn all_loans_requires_capability() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let resp = client()
        .get(format!("http://127.0.0.1:{}/loans", port))
        .header("cookie", session_cookie_for("reader"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn api_loans_requires_session_and_capability() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let c = client();

    let resp = c
        .get(format!("http://127.0.0.1:{}/api/loans", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = c
        .get(format!("http://127.0.0.1:{}/api/loans", port))
        .header("cookie", session_cookie_for("reader"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = c
        .get(format!("http://127.0.0.1:{}/api/loans", port))
        .header("cookie", session_cookie_for("librarian"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn author_crud_round_trip() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let c = client();
    let session = session_cookie_for("librarian");

    // Create
    let resp = c
        .post(format!("http://127.0.0.1:{}/authors/new", port))
        .header("cookie", &session)
        .form(&[
            ("first_name", "Ursula"),
            ("last_name", "Le Guin"),
            ("date_of_birth", "1929-10-21"),
            ("date_of_death", ""),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let location = resp
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // Detail renders
    let body = c
        .get(format!("http://127.0.0.1:{}{}", port, location))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("Le Guin, Ursula"));

    // Update
    let resp = c
        .post(format!("http://127.0.0.1:{}{}/edit", port, location))
        .header("cookie", &session)
        .form(&[
            ("first_name", "Ursula K."),
            ("last_name", "Le Guin"),
            ("date_of_birth", "1929-10-21"),
            ("date_of_death", "2018-01-22"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);

    // Delete (no books reference the new author)
    let resp = c
        .post(format!("http://127.0.0.1:{}{}/delete", port, location))
        .header("cookie", &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers().get("location").unwrap(), "/authors");
}

#[tokio::test]
async fn author_delete_with_books_shows_conflict() {
    let port = start_ui(test_state(seeded_store().await)).await;
    // Author 1 still owns book 1.
    let resp = client()
        .post(format!("http://127.0.0.1:{}/authors/1/delete", port))
        .header("cookie", session_cookie_for("librarian"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.text().await.unwrap().contains("still has books"));
}

#[tokio::test]
async fn crud_requires_editor_capability() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let resp = client()
        .post(format!("http://127.0.0.1:{}/authors/new", port))
        .header("cookie", session_cookie_for("reader"))
        .form(&[("first_name", "X"), ("last_name", "Y")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_author_date_rerenders_form() {
    let port = start_ui(test_state(seeded_store().await)).await;
    let resp = client()
        .post(format!("http://127.0.0.1:{}/authors/new", port))
        .header("cookie", session_cookie_for("librarian"))
        .form(&[
            ("first_name", "Ursula"),
            ("last_name", "Le Guin"),
            ("date_of_birth", "yesterday"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.text().await.unwrap();
    assert!(body.contains("is not a valid date"));
    assert!(body.contains("Ursula"));
}
