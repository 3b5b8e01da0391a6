pub mod check_run;
pub mod github;
pub mod migration;
