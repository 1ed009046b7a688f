pub mod cleanup;
pub mod last_used;
