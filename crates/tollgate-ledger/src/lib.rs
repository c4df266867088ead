#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod clock;
pub mod error;
pub mod ledger;
pub mod repository;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::LedgerError;
pub use ledger::{Admission, Reservation, UsageLedger};
pub use repository::{AccountRepository, MemoryRepository, RepositoryError};
pub use types::{Account, AccountView, DailyUsage, Denial, FeatureLimits, Plan, UsageDelta};
