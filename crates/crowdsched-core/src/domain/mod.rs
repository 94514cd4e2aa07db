//! Domain model (IDs, identities, tasks, projects, ordering, errors).
//!
//! ここには I/O を含めません。ストアへのアクセスは ports に、
//! 選択ロジックは sched に置きます。

pub mod errors;
pub mod identity;
pub mod ids;
pub mod order;
pub mod project;
pub mod task;

pub use self::errors::{ErrorKind, GuardError, InfraError, LockError, RepoError, SchedError};
pub use self::identity::{Identity, Role, Viewer};
pub use self::ids::{ProjectId, TaskId, UserId};
pub use self::order::{OrderField, TaskOrder};
pub use self::project::Project;
pub use self::task::{LockCandidate, Task, TaskRun, TaskState};
