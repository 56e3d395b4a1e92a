//! # Workshop Signup Bot
//!
//! A Telegram bot that registers people for a paid Python workshop (or a free
//! course) and then walks them through gated lessons and exams.
//!
//! ## Features
//! - Plan and payment selection with online or bank-transfer payment
//! - Receipt upload and admin approval for offline payments
//! - Lessons unlocked one at a time by passing each lesson's exam
//! - Hosted (Supabase) or local SQLite storage

/// Telegram commands, button payloads and the transport adapter
pub mod bot;
/// Configuration from environment variables
pub mod config;
/// Models, the store port and its backends
pub mod database;
/// Conversation flows, sessions and the health server
pub mod services;
/// Validation, formatting and logging helpers
pub mod utils;
