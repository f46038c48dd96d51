pub mod action_log;
pub mod collaborators;
pub mod config;
pub mod contexts;
pub mod data;
pub mod project_root;
pub mod registries;
