// User-facing commands
pub mod apply;

// Hidden entry points run on target hosts
pub mod internal;
