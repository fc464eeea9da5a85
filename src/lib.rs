//! Kobber: sales-lead tracking for an auto-parts counter.
//!
//! Salespeople record every customer inquiry as an opportunity that ended in
//! a sale or a loss. Admins review, edit and export the history and follow a
//! monthly dashboard. The `kobber` binary is a thin front end over
//! [`commands`].

pub mod auth;
pub mod classify;
pub mod commands;
pub mod config;
pub mod db;
pub mod db_backup;
pub mod error;
pub mod export;
pub mod filter;
pub mod form;
pub mod live;
pub mod lookup;
mod migrations;
pub mod money;
pub mod phone;
pub mod state;
pub mod stats;
pub mod types;
pub mod util;
