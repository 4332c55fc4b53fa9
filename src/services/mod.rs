pub mod arr;
pub mod classifier;
pub mod debrid;
pub mod dispatcher;
pub mod fsops;
pub mod ledger;
pub mod manager;
pub mod organizer;

pub use arr::{ArrClient, LibraryManager, LookupHint, LookupMatch, ManagerKind};
pub use debrid::{CacheItem, CacheService, DebridClient};
pub use dispatcher::{DispatchJob, Dispatcher};
pub use ledger::DedupLedger;
pub use manager::{ManagedTask, ManagerError, RunSummary, ServiceState, ServicesManager};
pub use organizer::{ManagerTarget, Organizer};
