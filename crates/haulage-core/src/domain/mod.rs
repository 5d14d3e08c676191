//! Domain model (ids, catalog, postings, loads, outcomes, errors, events).

pub mod catalog;
pub mod errors;
pub mod events;
pub mod ids;
pub mod load;
pub mod outcome;
pub mod posting;

pub use self::catalog::{CargoKind, Catalog, Requirement, Tier};
pub use self::errors::{ErrorKind, HaulError};
pub use self::events::{AuditEvent, AuditEventKind};
pub use self::ids::{ActorId, ClaimId, JobId, LoadId, PolicyId};
pub use self::load::{ActiveLoad, LoadCommand, LoadStatus, OwnershipMode, ShipperTier};
pub use self::outcome::{TerminalOutcome, TerminalRecord, TerminalTrigger};
pub use self::posting::{BoardStatus, JobPosting};
