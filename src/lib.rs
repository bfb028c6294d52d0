pub mod command;
pub mod config;
pub mod keypad;
pub mod link;
pub mod messages;
pub mod motor;
pub mod runtime;
