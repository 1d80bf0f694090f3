//! CLI subcommand implementations for the Trawl binary.

pub mod fetch_cmd;
