use catalog::{BookInstance, CatalogStore, LoanStatus};
use catalog_ui::{auth, create_app, AppState};
use chrono::{Duration, Utc};
use circulation::{CirculationConfig, CAP_MARK_RETURNED};
use reqwest::{redirect, StatusCode};
use tokio::task;
use uuid::Uuid;

const SECRET: &str = "renew-spec-secret";

struct Harness {
    port: u16,
    store: CatalogStore,
    copy_id: Uuid,
}

async fn start_harness() -> Harness {
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
    let copy_id = Uuid::new_v4();
    store
        .insert_copy(BookInstance {
            id: copy_id,
            book_id: book.id,
            imprint: "DAW Books, 2007.".into(),
            status: LoanStatus::OnLoan,
            due_back: Some(Utc::now().date_naive() + Duration::days(5)),
            borrower: Some("reader".into()),
        })
        .await
        .unwrap();

    let mut state = AppState::with_store(store.clone());
    state.circulation = CirculationConfig::default().grant("librarian", CAP_MARK_RETURNED);
    state.users = Default::default();
    state.session_secret = Some(SECRET.to_string());

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = create_app(state);
    task::spawn(async move { axum::serve(listener, app).await.unwrap() });

    Harness {
        port,
        store,
        copy_id,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap()
}

fn session_for(user: &str) -> String {
    let token = auth::issue_session(SECRET, user).unwrap();
    format!("{}={}", auth::SESSION_COOKIE, token)
}

#[tokio::test]
async fn renew_form_requires_login() {
    let h = start_harness().await;
    let resp = client()
        .get(format!(
            "http://127.0.0.1:{}/loans/{}/renew",
            h.port, h.copy_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let location = resp.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.starts_with("/login"));
}

#[tokio::test]
async fn renew_form_forbidden_without_capability() {
    let h = start_harness().await;
    let resp = client()
        .get(format!(
            "http://127.0.0.1:{}/loans/{}/renew",
            h.port, h.copy_id
        ))
        .header("cookie", session_for("reader"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn renew_form_unknown_loan_is_404() {
    let h = start_harness().await;
    let resp = client()
        .get(format!(
            "http://127.0.0.1:{}/loans/{}/renew",
            h.port,
            Uuid::new_v4()
        ))
        .header("cookie", session_for("librarian"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn renew_form_proposes_three_weeks_out() {
    let h = start_harness().await;
    let resp = client()
        .get(format!(
            "http://127.0.0.1:{}/loans/{}/renew",
            h.port, h.copy_id
        ))
        .header("cookie", session_for("librarian"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.text().await.unwrap();
    let proposed = (Utc::now().date_naive() + Duration::weeks(3))
        .format("%Y-%m-%d")
        .to_string();
    assert!(body.contains(&format!("value=\"{}\"", proposed)));
    assert!(body.contains("The Name of the Wind"));
}

#[tokio::test]
async fn valid_submission_commits_and_redirects_to_all_loans() {
    let h = start_harness().await;
    let new_due = Utc::now().date_naive() + Duration::days(9);
    let resp = client()
        .post(format!(
            "http://127.0.0.1:{}/loans/{}/renew",
            h.port, h.copy_id
        ))
        .header("cookie", session_for("librarian"))
        .form(&[("due_back", new_due.format("%Y-%m-%d").to_string())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers().get("location").unwrap(), "/loans");

    let copy = h.store.get_copy(h.copy_id).await.unwrap();
    assert_eq!(copy.due_back, Some(new_due));
}

#[tokio::test]
async fn past_date_rerenders_with_message_and_no_commit() {
    let h = start_harness().await;
    let original_due = h.store.get_copy(h.copy_id).await.unwrap().due_back;
    let past = Utc::now().date_naive() - Duration::days(1);
    let resp = client()
        .post(format!(
            "http://127.0.0.1:{}/loans/{}/renew",
            h.port, h.copy_id
        ))
        .header("cookie", session_for("librarian"))
        .form(&[("due_back", past.format("%Y-%m-%d").to_string())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.text().await.unwrap();
    assert!(body.contains("renewal in past"));
    // The offending value comes back for correction.
    assert!(body.contains(&format!("value=\"{}\"", past.format("%Y-%m-%d"))));

    let copy = h.store.get_copy(h.copy_id).await.unwrap();
    assert_eq!(copy.due_back, original_due);
}

#[tokio::test]
async fn far_future_date_rerenders_with_message() {
    let h = start_harness().await;
    let too_far = Utc::now().date_naive() + Duration::weeks(4) + Duration::days(1);
    let resp = client()
        .post(format!(
            "http://127.0.0.1:{}/loans/{}/renew",
            h.port, h.copy_id
        ))
        .header("cookie", session_for("librarian"))
        .form(&[("due_back", too_far.format("%Y-%m-%d").to_string())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("renewal more than 4 weeks ahead"));
}

#[tokio::test]
async fn unparseable_date_rerenders_with_message() {
    let h = start_harness().await;
    let resp = client()
        .post(format!(
            "http://127.0.0.1:{}/loans/{}/renew",
            h.port, h.copy_id
        ))
        .header("cookie", session_for("librarian"))
        .form(&[("due_back", "next tuesday")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.text().await.unwrap();
    assert!(body.contains("Enter a valid date"));

    let copy = h.store.get_copy(h.copy_id).await.unwrap();
    assert!(copy.due_back.is_some());
}

#[tokio::test]
async fn mark_returned_clears_the_loan() {
    let h = start_harness().await;
    let resp = client()
        .post(format!(
            "http://127.0.0.1:{}/loans/{}/return",
            h.port, h.copy_id
        ))
        .header("cookie", session_for("librarian"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers().get("location").unwrap(), "/loans");

    let copy = h.store.get_copy(h.copy_id).await.unwrap();
    assert_eq!(copy.status, LoanStatus::Available);
    assert_eq!(copy.borrower, None);
    assert_eq!(copy.due_back, None);
}
