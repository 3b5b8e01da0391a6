pub mod command;
pub mod git;
pub mod lock_analysis;
pub mod manage;
pub mod parser;
pub mod pg_dump;
