//! # citemark
//!
//! A local-first reference tracker that keeps three representations of a
//! tracked item coherent inside a managed content tree: a structured record
//! store, a regenerable companion document per item (machine-owned header,
//! user-owned body), and the set of other documents that mention the item.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌───────────────┐
//! │ Host events  │──▶│ Reconciliation    │──▶│  RecordStore  │
//! │ rename/delete│   │ Engine            │   │  (snapshot)   │
//! └──────────────┘   └───────────────────┘   └───┬───────────┘
//!                                                │
//!                      ┌─────────────────────────┤
//!                      ▼                         ▼
//!                ┌────────────┐           ┌─────────────┐
//!                │ Companion  │           │  Reference  │
//!                │ Manager    │           │  Resolver   │
//!                └────────────┘           └─────────────┘
//! ```
//!
//! Records flow one way: components compute next-state [`models::Record`]
//! values and hand them to [`store::RecordStore::update`], the single
//! mutation path. The host environment sits behind the traits in [`host`];
//! two implementations ship with the crate (in-memory and filesystem).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`host`] | Host trait boundary + bundled vaults |
//! | [`store`] | Record store and snapshot persistence |
//! | [`header`] | Companion header format (render + parse) |
//! | [`template`] | Companion path templating |
//! | [`companion`] | Companion-document lifecycle |
//! | [`resolver`] | Multi-strategy reference resolution |
//! | [`reconcile`] | Rename/delete reconciliation |
//! | [`sync`] | Bulk drivers, reentrancy guard |
//! | [`paths`] | Vault-path string helpers |

pub mod companion;
pub mod config;
pub mod header;
pub mod host;
pub mod models;
pub mod paths;
pub mod reconcile;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod template;
