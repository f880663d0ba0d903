pub mod capabilities;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod extractor;
pub mod harvester;
pub mod job;
pub mod metadata;
pub mod profile;
pub mod scroll;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod tracker;
pub mod types;

pub use config::{AppConfig, HarvestConfig};
pub use error::{HarvestError, SessionError};
pub use harvester::{HarvestReport, Harvester};
pub use job::{HarvestJob, JobReport, ListReport, ListRequest};
pub use profile::PageProfile;
pub use session::{BrowserSession, WebDriverSession};
pub use types::{Entry, HarvestOutcome, ListMetadata, PartialReason};
