mod run;
mod serve;
mod status;
mod task;

// Task commands
pub use task::{
    run_task_add, run_task_list, run_task_remove, run_task_set_active, run_task_update,
};

// Run commands
pub use run::{run_backup, run_history};

// Serve command
pub use serve::run_serve;

// Status command
pub use status::run_status;
