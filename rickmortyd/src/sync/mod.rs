pub mod avatar;
pub mod engine;
pub mod mirror;
pub mod orchestrator;
pub mod scheduler;
pub mod translate;
