pub mod assistant;
pub mod config;
pub mod db;
pub mod llm;
pub mod memory;
pub mod persona;
pub mod prompt;
pub mod sched;
pub mod search;
pub mod skills;
