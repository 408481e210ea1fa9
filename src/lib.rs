//! # Reference Indexer
//!
//! A budget-aware indexing and retrieval engine for reference code
//! repositories.
//!
//! Given a collection of reference repositories and the file structure of a
//! target project being planned, the indexer scans each repository, narrows
//! the file set with one or two reasoning-oracle filtering stages chosen by
//! a prompt budget guard, analyzes the surviving files, maps scored
//! relationships to the target structure, and persists one JSON index
//! document per repository. The query engine then serves free-text search
//! and aggregate overviews over the persisted indexes without re-indexing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌─────────────────┐   ┌──────────┐
//! │ Scanner  │──▶│ Budget Guard │──▶│ Filters (1│2)   │──▶│ Analyzer │
//! └──────────┘   └─────────────┘   └─────────────────┘   └────┬─────┘
//!                                                             │
//!                    ┌──────────┐       ┌──────────┐     ┌────▼─────┐
//!                    │  Query   │◀──────│  Store    │◀────│  Mapper  │
//!                    │  (rix)   │       │  (JSON)  │     └──────────┘
//!                    └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rix index --target-structure plan.txt   # index every reference repo
//! rix search "streaming decoder"          # search persisted relationships
//! rix overview                            # summarize all indexes
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`scanner`] | Repository traversal and tree serialization |
//! | [`budget`] | Prompt budget guard |
//! | [`oracle`] | Reasoning-oracle contract and HTTP client |
//! | [`filter`] | Directory filter and file pre-filter |
//! | [`analyzer`] | Per-file structured analysis |
//! | [`mapper`] | Relationship mapping and ranking |
//! | [`indexer`] | Pipeline orchestration and batch runs |
//! | [`store`] | Persisted index documents |
//! | [`query`] | Read-only search and overview |

pub mod analyzer;
pub mod budget;
pub mod config;
pub mod filter;
pub mod indexer;
pub mod mapper;
pub mod models;
pub mod oracle;
pub mod query;
pub mod scanner;
pub mod store;
