pub mod actions;
pub mod context;
pub mod decision;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod orchestrator;
pub mod prompt;
pub mod state;
