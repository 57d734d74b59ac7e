//! Domain models and in-process storage for the library catalog.

pub mod model;
pub mod store;

pub use model::{Author, Book, BookInstance, Genre, LoanStatus};
pub use store::{CatalogStore, StoreError};
