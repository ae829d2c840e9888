//! Activity handlers and their registry

pub mod command;
pub mod context;
pub mod definition;
pub mod error;
pub mod input;
pub mod process;
pub mod registry;

pub use command::{run_command, CommandSpec};
pub use context::ActivityContext;
pub use definition::ActivityDefinition;
pub use error::{ActivityError, ActivityResult};
pub use input::ActivityInput;
pub use process::{run_in_process, run_task, serve_task, TaskMessage, TASK_PROCESS_ENV};
pub use registry::{ActivityRegistry, BoxedActivityFn, RegisteredActivity};
