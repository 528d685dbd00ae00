pub mod help;
pub mod launcher;
pub mod sessions;
pub mod variables;
