//! Loan policy for the library catalog: who may touch loans, and how a
//! borrowed copy's due-back date gets renewed.

pub mod capabilities;
pub mod renewal;

pub use capabilities::{CirculationConfig, CAP_EDIT_CATALOG, CAP_MARK_RETURNED};
pub use renewal::{
    mark_returned, renew, renew_as_of, RenewalError, RenewalForm, RenewalOutcome,
};
