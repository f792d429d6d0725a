//! Command implementations wiring the CLI to the services layer

pub mod promote;
