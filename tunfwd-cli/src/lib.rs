//! Shared pieces of the `tunfwdd` and `tunfwdctl` binaries.

pub mod args;
pub mod ctl;
pub mod supervise;
