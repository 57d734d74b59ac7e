use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Loan status of a physical copy. Serialized with the one-letter codes
/// the original catalog data uses (`m`, `o`, `a`, `r`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoanStatus {
    #[serde(rename = "m")]
    Maintenance,
    #[serde(rename = "o")]
    OnLoan,
    #[serde(rename = "a")]
    Available,
    #[serde(rename = "r")]
    Reserved,
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanStatus::Maintenance => write!(f, "Maintenance"),
            LoanStatus::OnLoan => write!(f, "On loan"),
            LoanStatus::Available => write!(f, "Available"),
            LoanStatus::Reserved => write!(f, "Reserved"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Author {
    pub id: u64,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    #[serde(rename = "dateOfBirth", skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(rename = "dateOfDeath", skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub date_of_death: Option<NaiveDate>,
}

impl Author {
    /// Display name in "Lastname, Firstname" order, matching the catalog
    /// listing convention.
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genre {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub id: u64,
    pub title: String,
    #[serde(rename = "authorId")]
    pub author_id: u64,
    pub summary: String,
    pub isbn: String,
    #[serde(rename = "genreIds", default)]
    pub genre_ids: Vec<u64>,
}

/// A physical copy of a book. This is the loan record: the renewal
/// workflow reads and rewrites `due_back`, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookInstance {
    pub id: Uuid,
    #[serde(rename = "bookId")]
    pub book_id: u64,
    pub imprint: String,
    pub status: LoanStatus,
    #[serde(rename = "dueBack", skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub due_back: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub borrower: Option<String>,
}

impl BookInstance {
    pub fn is_on_loan(&self) -> bool {
        self.status == LoanStatus::OnLoan
    }

    /// True when the copy is on loan and the due date has passed.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        match (self.status, self.due_back) {
            (LoanStatus::OnLoan, Some(due)) => due < today,
            _ => false,
        }
    }
}
