//! Sync social-media bookmarks and likes into a local note vault, grouped
//! into topic folders chosen by a hosted language model.

pub mod categorizer;
pub mod config;
pub mod document;
pub mod events;
pub mod fetcher;
pub mod llm;
pub mod model;
pub mod organizer;
pub mod state;
pub mod sync;
pub mod vault;
