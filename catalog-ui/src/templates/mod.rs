use serde::Serialize;

use catalog::{Author, Book, BookInstance};
use chrono::NaiveDate;

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BookVm {
    pub id: u64,
    pub title: String,
    pub author: String,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthorVm {
    pub id: u64,
    pub name: String,
    pub date_of_birth: Option<String>,
    pub date_of_death: Option<String>,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CopyVm {
    pub id: String,
    pub book_id: u64,
    pub book_title: String,
    pub imprint: String,
    pub status: String,
    pub status_class: String,
    pub due_back: Option<String>,
    pub borrower: Option<String>,
    pub overdue: bool,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaginationVm {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub has_prev: bool,
    pub has_next: bool,
}

impl PaginationVm {
    pub fn new(page: usize, per_page: usize, total: usize) -> Self {
        let page = page.max(1);
        Self {
            page,
            per_page,
            total,
            has_prev: page > 1,
            has_next: page.saturating_mul(per_page) < total,
        }
    }
}

fn fmt_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

impl BookVm {
    pub fn new(book: &Book, author: Option<&Author>) -> Self {
        Self {
            id: book.id,
            title: book.title.clone(),
            author: author
                .map(Author::display_name)
                .unwrap_or_else(|| "Unknown author".to_string()),
        }
    }
}

impl AuthorVm {
    pub fn new(author: &Author) -> Self {
        Self {
            id: author.id,
            name: author.display_name(),
            date_of_birth: fmt_date(author.date_of_birth),
            date_of_death: fmt_date(author.date_of_death),
        }
    }
}

impl CopyVm {
    pub fn new(copy: &BookInstance, book_title: &str, today: NaiveDate) -> Self {
        let status_class = match copy.status {
            catalog::LoanStatus::Available => "status-available",
            catalog::LoanStatus::OnLoan => "status-on-loan",
            catalog::LoanStatus::Maintenance => "status-maintenance",
            catalog::LoanStatus::Reserved => "status-reserved",
        };
        Self {
            id: copy.id.to_string(),
            book_id: copy.book_id,
            book_title: book_title.to_string(),
            imprint: copy.imprint.clone(),
            status: copy.status.to_string(),
            status_class: status_class.to_string(),
            due_back: fmt_date(copy.due_back),
            borrower: copy.borrower.clone(),
            overdue: copy.is_overdue(today),
        }
    }
}
