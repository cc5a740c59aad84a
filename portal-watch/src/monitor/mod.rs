// Portal monitoring: session handling, change detection and alerting
// Shared between the daemon and the CLI binaries

pub mod config;
pub mod detector;
pub mod email;
pub mod error;
pub mod http_portal;
pub mod notify;
pub mod persistence;
pub mod portal;
pub mod runner;
pub mod session;
pub mod snapshot;

pub use error::{AuthError, ConfigError, DeliveryError, FetchError};
pub use notify::{AlertMessage, Notifier, TerminalNotifier};
pub use portal::{Credentials, PortalClient, PortalConnector};
pub use runner::{CommitPolicy, CycleOutcome, LoopSettings, MonitorLoop};
pub use session::{SessionSettings, SessionStatus, SessionSupervisor};
pub use snapshot::{ListingItem, MonitorState, Snapshot, SnapshotStore};
