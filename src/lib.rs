//! Purpose: Shared library crate behind the `cards` binary and its tests.
//! Exports: `core` (card model, document shapes, errors), `store`, `gateway`, `api`, `view`.
//! Role: Gateway logic and client controller live here; the binary adds HTTP serving and the CLI.
//! Invariants: Gateway operations take an injected `DocumentStore`; nothing reaches for globals.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod gateway;
pub mod store;
pub mod view;
