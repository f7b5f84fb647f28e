pub mod deploy;
pub mod error;
pub mod guard;
pub mod revision;
pub mod russh;
pub mod transport;
