//! Newsdesk - A caching news aggregation service
//!
//! This crate serves pages of news articles per category, reading through a
//! local SQLite store to an upstream headlines API, and lets users keep
//! bookmarks and topic interests.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod refresher;
pub mod routes;
pub mod upstream;
