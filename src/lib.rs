//! Configuration and load-order persistence for The Witcher 3 mod manager.
//!
//! Two INI files are kept in sync with disk: the manager's own `config.ini`
//! and the game's `mods.settings`. Writes are debounced per file and skipped
//! when nothing changed since the last write.

pub mod alerts;
pub mod cli;
pub mod context;
pub mod debounce;
pub mod encoding;
pub mod error;
pub mod fixup;
pub mod ini;
pub mod paths;
pub mod priority;
pub mod settings;
pub mod store;
