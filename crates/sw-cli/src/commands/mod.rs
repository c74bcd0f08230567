//! Command implementations shared by the CLI entry point.

pub mod discover;

pub use discover::{
    build_service, load_report, parse_filter, parse_keys, pending_report, resolve_selection,
    save_report, select_by_mode, CommitMode, ResolveMode,
};
