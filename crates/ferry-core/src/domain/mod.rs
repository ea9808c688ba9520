//! Domain model (IDs, events, run state, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod state;

pub use self::errors::{ErrorKind, FerryError, ProvisionError, RegistryError, ValidationError};
pub use self::events::{DomainEvent, JobAction, JobEvent};
pub use self::ids::{InstanceHandle, RunId, RunnerName};
pub use self::state::{JobRun, RunState};
