pub mod gate;
pub mod permissions;
pub mod rate_limit;
