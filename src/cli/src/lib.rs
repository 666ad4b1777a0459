//! A3S Model CLI - build, share and unpack model packages.

pub mod commands;
pub mod output;
