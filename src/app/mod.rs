//! Application runtime composition modules.

pub(crate) mod command_dispatcher;
pub(crate) mod exit_handler;
pub(crate) mod progress_manager;
pub(crate) mod run_settings;
pub(crate) mod runtime;
pub(crate) mod terminal;
