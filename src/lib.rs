//! # Scripture Sync
//!
//! Matches live transcript fragments against a verse catalog and keeps one
//! shared "currently displayed" selection that viewers follow in real time.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ Transcript │──▶│ Exact · Fuzzy · Semantic │──▶│  Fusion  │
//! │ (text/PCM) │   └──────────────────────────┘   └────┬─────┘
//! └────────────┘                                      │ best ≥ min_score
//!                                                     ▼
//!                 ┌───────────┐   accepted   ┌────────────────┐
//!                 │  Session  │─────────────▶│ Broadcast      │──▶ viewers (/ws)
//!                 │ (lock,seq)│              │ per-viewer     │
//!                 └───────────┘              │ drop-oldest    │
//!                       ▲                    └────────────────┘
//!                       │ manual / lock
//!                 HTTP control surface
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`normalize`] | Text normalization for every comparison |
//! | [`scoring`] | `Scorer` capability interface and prepared `Query` |
//! | [`exact`] | Literal containment / token overlap score |
//! | [`fuzzy`] | Edit-distance score tolerant of transcription noise |
//! | [`index`] | Nearest-neighbor index over verse vectors |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`fusion`] | Score fusion and match selection |
//! | [`matcher`] | Catalog-wide candidate scoring |
//! | [`session`] | Live selection, lock flag and sequence arbitration |
//! | [`broadcast`] | Per-subscriber bounded fanout |
//! | [`events`] | Viewer event kinds |
//! | [`transcription`] | Speech-to-text collaborator with timeout |
//! | [`pipeline`] | `Engine` and the fragment worker |
//! | [`catalog`] | Verse import, seed data, vector cache |
//! | [`event_log`] | Transcription history sink |
//! | [`server`] | HTTP + WebSocket server |
//! | [`commands`] | CLI command bodies |
//! | [`config`] | TOML configuration |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod broadcast;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod event_log;
pub mod events;
pub mod exact;
pub mod fusion;
pub mod fuzzy;
pub mod index;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod scoring;
pub mod server;
pub mod session;
pub mod transcription;
