//! CSV command scripts in, CSV reports out.

pub mod command_reader;
pub mod commands;
pub mod report_writer;
