pub mod commands;
pub mod events;
pub mod handlers;
pub mod intent;
pub mod messenger;
