pub use self::correlation::{CorrelationRecord, CorrelationStore};
pub use self::error::StoreError;
pub use self::identity::{IdentityCache, IdentityProvisioner, WebhookCredential};

pub mod correlation;
pub mod error;
mod file;
pub mod identity;
