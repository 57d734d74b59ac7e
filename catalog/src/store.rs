use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Author, Book, BookInstance, Genre, LoanStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("catalog i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog data is malformed: {0}")]
    Malformed(String),
}

/// On-disk shape of the catalog, used both for the YAML seed file and the
/// JSON snapshot written after mutations.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub copies: Vec<BookInstance>,
}

/// Headline numbers for the index page.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CatalogCounts {
    pub books: usize,
    pub copies: usize,
    #[serde(rename = "copiesAvailable")]
    pub copies_available: usize,
    pub authors: usize,
}

#[derive(Debug, Default)]
struct Inner {
    authors: BTreeMap<u64, Author>,
    genres: BTreeMap<u64, Genre>,
    books: BTreeMap<u64, Book>,
    copies: HashMap<Uuid, BookInstance>,
    next_author_id: u64,
    next_book_id: u64,
}

impl Inner {
    fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let mut inner = Inner::default();
        for author in snapshot.authors {
            inner.next_author_id = inner.next_author_id.max(author.id + 1);
            inner.authors.insert(author.id, author);
        }
        for genre in snapshot.genres {
            inner.genres.insert(genre.id, genre);
        }
        for book in snapshot.books {
            inner.next_book_id = inner.next_book_id.max(book.id + 1);
            inner.books.insert(book.id, book);
        }
        for copy in snapshot.copies {
            inner.copies.insert(copy.id, copy);
        }
        inner
    }

    fn to_snapshot(&self) -> CatalogSnapshot {
        let mut copies: Vec<BookInstance> = self.copies.values().cloned().collect();
        copies.sort_by_key(|c| c.id);
        CatalogSnapshot {
            authors: self.authors.values().cloned().collect(),
            genres: self.genres.values().cloned().collect(),
            books: self.books.values().cloned().collect(),
            copies,
        }
    }
}

/// In-process catalog store. Cloning is cheap; all clones share state.
///
/// Writes go through a single `RwLock`, so concurrent mutations of the same
/// record resolve last-write-wins. Nothing stronger is promised to callers.
#[derive(Clone)]
pub struct CatalogStore {
    inner: Arc<RwLock<Inner>>,
    data_path: Option<PathBuf>,
}

impl CatalogStore {
    /// Empty store with no snapshot persistence. Used by tests.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            data_path: None,
        }
    }

    /// Store initialized from the environment:
    /// `LIBRARY_DATA_PATH` names the JSON snapshot (defaults under the
    /// platform data dir); if no snapshot exists yet, `LIBRARY_SEED_PATH`
    /// names a YAML seed catalog to import.
    pub fn from_env() -> Result<Self, StoreError> {
        let data_path = std::env::var("LIBRARY_DATA_PATH")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::data_dir().map(|d| d.join("library-catalog").join("catalog.json")));

        if let Some(path) = data_path.as_deref() {
            if path.exists() {
                let store = Self::load_snapshot(path)?;
                info!("Loaded catalog snapshot from {}", path.display());
                return Ok(Self {
                    data_path,
                    ..store
                });
            }
        }

        let store = match std::env::var("LIBRARY_SEED_PATH") {
            Ok(seed) => {
                let store = Self::load_seed(Path::new(&seed))?;
                info!("Seeded catalog from {}", seed);
                store
            }
            Err(_) => {
                warn!("No catalog snapshot or seed configured, starting empty");
                Self::new()
            }
        };
        Ok(Self { data_path, ..store })
    }

    /// Import a YAML seed catalog.
    pub fn load_seed(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: CatalogSnapshot =
            serde_yaml::from_str(&raw).map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Inner::from_snapshot(snapshot))),
            data_path: None,
        })
    }

    /// Load a previously persisted JSON snapshot.
    pub fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: CatalogSnapshot =
            serde_json::from_str(&raw).map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Inner::from_snapshot(snapshot))),
            data_path: None,
        })
    }

    /// Write the current catalog to the snapshot path, if one is configured.
    /// Called with the write lock already released; the snapshot is a copy.
    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = self.data_path.as_deref() else {
            return Ok(());
        };
        let snapshot = self.inner.read().await.to_snapshot();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        debug!("Persisted catalog snapshot to {}", path.display());
        Ok(())
    }

    pub async fn counts(&self) -> CatalogCounts {
        let inner = self.inner.read().await;
        CatalogCounts {
            books: inner.books.len(),
            copies: inner.copies.len(),
            copies_available: inner
                .copies
                .values()
                .filter(|c| c.status == LoanStatus::Available)
                .count(),
            authors: inner.authors.len(),
        }
    }

    /// Page of books plus the total count. `page` is 1-based.
    pub async fn list_books(&self, page: usize, per_page: usize) -> (Vec<Book>, usize) {
        let inner = self.inner.read().await;
        let total = inner.books.len();
        let page = page.max(1);
        let books = inner
            .books
            .values()
            .skip(page.saturating_sub(1).saturating_mul(per_page))
            .take(per_page)
            .cloned()
            .collect();
        (books, total)
    }

    pub async fn get_book(&self, id: u64) -> Result<Book, StoreError> {
        self.inner
            .read()
            .await
            .books
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("book {}", id)))
    }

    pub async fn copies_of_book(&self, book_id: u64) -> Vec<BookInstance> {
        let inner = self.inner.read().await;
        let mut copies: Vec<BookInstance> = inner
            .copies
            .values()
            .filter(|c| c.book_id == book_id)
            .cloned()
            .collect();
        copies.sort_by_key(|c| c.id);
        copies
    }

    pub async fn list_authors(&self, page: usize, per_page: usize) -> (Vec<Author>, usize) {
        let inner = self.inner.read().await;
        let total = inner.authors.len();
        let page = page.max(1);
        let authors = inner
            .authors
            .values()
            .skip(page.saturating_sub(1).saturating_mul(per_page))
            .take(per_page)
            .cloned()
            .collect();
        (authors, total)
    }

    pub async fn get_author(&self, id: u64) -> Result<Author, StoreError> {
        self.inner
            .read()
            .await
            .authors
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("author {}", id)))
    }

    pub async fn books_by_author(&self, author_id: u64) -> Vec<Book> {
        self.inner
            .read()
            .await
            .books
            .values()
            .filter(|b| b.author_id == author_id)
            .cloned()
            .collect()
    }

    pub async fn genres(&self) -> Vec<Genre> {
        self.inner.read().await.genres.values().cloned().collect()
    }

    pub async fn genre_names(&self, ids: &[u64]) -> Vec<String> {
        let inner = self.inner.read().await;
        ids.iter()
            .filter_map(|id| inner.genres.get(id).map(|g| g.name.clone()))
            .collect()
    }

    pub async fn get_copy(&self, id: Uuid) -> Result<BookInstance, StoreError> {
        self.inner
            .read()
            .await
            .copies
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("copy {}", id)))
    }

    /// Copies currently on loan to a borrower, soonest due first.
    pub async fn loans_for_borrower(&self, borrower: &str) -> Vec<BookInstance> {
        let inner = self.inner.read().await;
        let mut loans: Vec<BookInstance> = inner
            .copies
            .values()
            .filter(|c| c.is_on_loan() && c.borrower.as_deref() == Some(borrower))
            .cloned()
            .collect();
        loans.sort_by_key(|c| c.due_back);
        loans
    }

    /// All copies currently on loan, soonest due first. Staff view.
    pub async fn all_loans(&self) -> Vec<BookInstance> {
        let inner = self.inner.read().await;
        let mut loans: Vec<BookInstance> = inner
            .copies
            .values()
            .filter(|c| c.is_on_loan())
            .cloned()
            .collect();
        loans.sort_by_key(|c| c.due_back);
        loans
    }

    /// Overwrite a copy's due-back date. This is the single-record write
    /// the renewal workflow commits through; it touches nothing else.
    pub async fn set_due_back(
        &self,
        id: Uuid,
        due_back: chrono::NaiveDate,
    ) -> Result<BookInstance, StoreError> {
        let updated = {
            let mut inner = self.inner.write().await;
            let copy = inner
                .copies
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(format!("copy {}", id)))?;
            copy.due_back = Some(due_back);
            copy.clone()
        };
        self.persist().await?;
        Ok(updated)
    }

    /// Return a copy to the shelf: clears the borrower and due date.
    pub async fn mark_returned(&self, id: Uuid) -> Result<BookInstance, StoreError> {
        let updated = {
            let mut inner = self.inner.write().await;
            let copy = inner
                .copies
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(format!("copy {}", id)))?;
            copy.status = LoanStatus::Available;
            copy.borrower = None;
            copy.due_back = None;
            copy.clone()
        };
        self.persist().await?;
        Ok(updated)
    }

    pub async fn insert_copy(&self, copy: BookInstance) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            inner.copies.insert(copy.id, copy);
        }
        self.persist().await
    }

    pub async fn create_author(
        &self,
        first_name: String,
        last_name: String,
        date_of_birth: Option<chrono::NaiveDate>,
        date_of_death: Option<chrono::NaiveDate>,
    ) -> Result<Author, StoreError> {
        let author = {
            let mut inner = self.inner.write().await;
            let id = inner.next_author_id.max(1);
            inner.next_author_id = id + 1;
            let author = Author {
                id,
                first_name,
                last_name,
                date_of_birth,
                date_of_death,
            };
            inner.authors.insert(id, author.clone());
            author
        };
        self.persist().await?;
        Ok(author)
    }

    pub async fn update_author(&self, author: Author) -> Result<Author, StoreError> {
        {
            let mut inner = self.inner.write().await;
            if !inner.authors.contains_key(&author.id) {
                return Err(StoreError::NotFound(format!("author {}", author.id)));
            }
            inner.authors.insert(author.id, author.clone());
        }
        self.persist().await?;
        Ok(author)
    }

    /// Delete an author. Refused while books still reference them.
    pub async fn delete_author(&self, id: u64) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            if !inner.authors.contains_key(&id) {
                return Err(StoreError::NotFound(format!("author {}", id)));
            }
            if inner.books.values().any(|b| b.author_id == id) {
                return Err(StoreError::Conflict(format!(
                    "author {} still has books in the catalog",
                    id
                )));
            }
            inner.authors.remove(&id);
        }
        self.persist().await
    }

    pub async fn create_book(
        &self,
        title: String,
        author_id: u64,
        summary: String,
        isbn: String,
        genre_ids: Vec<u64>,
    ) -> Result<Book, StoreError> {
        let book = {
            let mut inner = self.inner.write().await;
            if !inner.authors.contains_key(&author_id) {
                return Err(StoreError::NotFound(format!("author {}", author_id)));
            }
            let id = inner.next_book_id.max(1);
            inner.next_book_id = id + 1;
            let book = Book {
                id,
                title,
                author_id,
                summary,
                isbn,
                genre_ids,
            };
            inner.books.insert(id, book.clone());
            book
        };
        self.persist().await?;
        Ok(book)
    }

    pub async fn update_book(&self, book: Book) -> Result<Book, StoreError> {
        {
            let mut inner = self.inner.write().await;
            if !inner.books.contains_key(&book.id) {
                return Err(StoreError::NotFound(format!("book {}", book.id)));
            }
            if !inner.authors.contains_key(&book.author_id) {
                return Err(StoreError::NotFound(format!("author {}", book.author_id)));
            }
            inner.books.insert(book.id, book.clone());
        }
        self.persist().await?;
        Ok(book)
    }

    /// Delete a book. Refused while copies of it still exist.
    pub async fn delete_book(&self, id: u64) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            if !inner.books.contains_key(&id) {
                return Err(StoreError::NotFound(format!("book {}", id)));
            }
            if inner.copies.values().any(|c| c.book_id == id) {
                return Err(StoreError::Conflict(format!(
                    "book {} still has copies in the catalog",
                    id
                )));
            }
            inner.books.remove(&id);
        }
        self.persist().await
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}
