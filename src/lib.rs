pub mod audit;
pub mod config;
pub mod edit_history;
pub mod export;
pub mod ledger;
pub mod models;
pub mod sanitize;
pub mod session;
pub mod store;

pub use audit::AuditLog;
pub use edit_history::{EditHistory, EditSession};
pub use export::ExportView;
pub use ledger::{ConflictLedger, Disposition, ValidationError};
pub use session::{CaseSession, SaveOutcome, SessionError, SessionStatus};
pub use store::{CaseStore, StorageError, StorageMedium};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber, filtered by `RUST_LOG` or the crate
/// default. Safe to call more than once.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}
