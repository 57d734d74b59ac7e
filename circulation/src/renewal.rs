use catalog::{BookInstance, CatalogStore, StoreError};
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capabilities::{CirculationConfig, CAP_MARK_RETURNED};

/// Proposed default loan extension when the form is first opened.
pub const DEFAULT_RENEWAL_WEEKS: i64 = 3;

/// Longest extension a librarian may grant from today.
pub const MAX_RENEWAL_WEEKS: i64 = 4;

/// Where a committed renewal sends the librarian: the all-loans screen.
pub const ALL_LOANS_VIEW: &str = "/loans";

#[derive(Debug, thiserror::Error)]
pub enum RenewalError {
    #[error("loan record {0} not found")]
    NotFound(Uuid),
    #[error("actor {0} may not renew loans")]
    PermissionDenied(String),
    #[error(transparent)]
    Store(StoreError),
}

/// The transient renewal request as (re)presented to the actor: one
/// proposed date, plus the validation message when the last submission
/// was rejected. Never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenewalForm {
    pub proposed: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one renewal interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    /// Show (or re-show) the form. Carries the loan record for display
    /// context; `form.error` is set when a submission was rejected.
    Render {
        loan: BookInstance,
        form: RenewalForm,
    },
    /// The due-back date was committed; send the actor back to the
    /// all-loans screen.
    Committed {
        loan: BookInstance,
        redirect: &'static str,
    },
}

/// Default proposal policy: three weeks out from today. Pure function of
/// the clock, recomputed on every invocation.
pub fn default_proposal(today: NaiveDate) -> NaiveDate {
    today + Duration::weeks(DEFAULT_RENEWAL_WEEKS)
}

/// Validation policy for a submitted date. `Err` carries the reason shown
/// to the actor.
pub fn validate_proposal(today: NaiveDate, proposed: NaiveDate) -> Result<(), String> {
    if proposed < today {
        return Err("Invalid date - renewal in past".to_string());
    }
    if proposed > today + Duration::weeks(MAX_RENEWAL_WEEKS) {
        return Err("Invalid date - renewal more than 4 weeks ahead".to_string());
    }
    Ok(())
}

/// Renew a loan as of the current date. See [`renew_as_of`].
pub async fn renew(
    store: &CatalogStore,
    cfg: &CirculationConfig,
    loan_id: Uuid,
    actor: &str,
    submitted: Option<NaiveDate>,
) -> Result<RenewalOutcome, RenewalError> {
    renew_as_of(store, cfg, loan_id, actor, submitted, Utc::now().date_naive()).await
}

/// One renewal interaction for loan `loan_id` by `actor`.
///
/// Gates run in a fixed order, each short-circuiting the rest: capability
/// check, then record lookup, then (for submissions) validation, then the
/// single-record commit. A rejected date is returned for correction with
/// the record untouched; `set_due_back` is reached at most once and only
/// with a validated date.
pub async fn renew_as_of(
    store: &CatalogStore,
    cfg: &CirculationConfig,
    loan_id: Uuid,
    actor: &str,
    submitted: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<RenewalOutcome, RenewalError> {
    if !cfg.has_capability(actor, CAP_MARK_RETURNED) {
        warn!("Actor {} denied renewal of {}", actor, loan_id);
        return Err(RenewalError::PermissionDenied(actor.to_string()));
    }

    let loan = match store.get_copy(loan_id).await {
        Ok(loan) => loan,
        Err(StoreError::NotFound(_)) => return Err(RenewalError::NotFound(loan_id)),
        Err(e) => return Err(RenewalError::Store(e)),
    };

    let Some(proposed) = submitted else {
        debug!("Presenting renewal form for {}", loan_id);
        return Ok(RenewalOutcome::Render {
            loan,
            form: RenewalForm {
                proposed: default_proposal(today),
                error: None,
            },
        });
    };

    if let Err(reason) = validate_proposal(today, proposed) {
        debug!("Rejected renewal date {} for {}: {}", proposed, loan_id, reason);
        return Ok(RenewalOutcome::Render {
            loan,
            form: RenewalForm {
                proposed,
                error: Some(reason),
            },
        });
    }

    let loan = match store.set_due_back(loan_id, proposed).await {
        Ok(loan) => loan,
        Err(StoreError::NotFound(_)) => return Err(RenewalError::NotFound(loan_id)),
        Err(e) => return Err(RenewalError::Store(e)),
    };
    info!("Renewed loan {} until {} by {}", loan_id, proposed, actor);
    Ok(RenewalOutcome::Committed {
        loan,
        redirect: ALL_LOANS_VIEW,
    })
}

/// Mark a copy returned. Same capability gate as renewal; clears the
/// borrower and due date and shelves the copy.
pub async fn mark_returned(
    store: &CatalogStore,
    cfg: &CirculationConfig,
    loan_id: Uuid,
    actor: &str,
) -> Result<BookInstance, RenewalError> {
    if !cfg.has_capability(actor, CAP_MARK_RETURNED) {
        warn!("Actor {} denied return of {}", actor, loan_id);
        return Err(RenewalError::PermissionDenied(actor.to_string()));
    }
    match store.mark_returned(loan_id).await {
        Ok(loan) => {
            info!("Copy {} returned, processed by {}", loan_id, actor);
            Ok(loan)
        }
        Err(StoreError::NotFound(_)) => Err(RenewalError::NotFound(loan_id)),
        Err(e) => Err(RenewalError::Store(e)),
    }
}
