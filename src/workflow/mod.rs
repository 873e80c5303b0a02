//! Card workflow: kanban card lifecycle with gated stage transitions.
//!
//! ## Overview
//!
//! Cards live in stages (`todo`, `in_process`, `done`, `archived`) on a
//! board. Every mutation passes the same rules before it is persisted:
//! WIP limits, deadlines for in-process work, acceptance criteria for done
//! work, and parent/child constraints. Reads go through a tagged cache that
//! mutations evict by board, stage and card id.
//!
//! ## Module Map
//!
//! ```text
//! ┌─────────┐        ┌──────────────────────────────────────────────────┐
//! │   CLI   │ ─────> │  service.rs  (CardService)                       │
//! └─────────┘        │    └─ cache.rs  (TaggedCache, CacheKey, Tag)      │
//!                    │         │                                        │
//!                    │         │ on miss / every mutation               │
//!                    │         v                                        │
//!                    │  engine.rs  (CardWorkflow)                       │
//!                    │    ├─ stage.rs       (StageRegistry)             │
//!                    │    ├─ acceptance.rs  (AcceptanceGate)            │
//!                    │    └─ code.rs        (CodeGenerator, Clock)      │
//!                    │         │                                        │
//!                    │         │ ports.rs traits                        │
//!                    │         v                                        │
//!                    │  db.rs  (DbHandle → SQLite)                      │
//!                    └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                           |
//! |--------------|----------------------------------------------------------|
//! | `models`     | Shared types: `Card`, `Stage`, `Board`, `CardUpdate`     |
//! | `ports`      | Storage and activity traits the engine depends on        |
//! | `db`         | SQLite schema, queries, and the port implementations     |
//! | `locks`      | Named async locks for stage admission and code numbering |

pub mod acceptance;
pub mod cache;
pub mod code;
pub mod db;
pub mod engine;
pub mod locks;
pub mod models;
pub mod ports;
pub mod service;
pub mod stage;

pub use acceptance::{AcceptanceGate, CriteriaStore};
pub use cache::{CacheKey, CacheStats, Tag, TaggedCache};
pub use code::{Clock, CodeGenerator, FixedClock, SystemClock};
pub use db::{DbHandle, KanbanDb};
pub use engine::{CardWorkflow, Collaborators};
pub use locks::{KeyedGuard, KeyedLocks};
pub use models::*;
pub use service::CardService;
pub use stage::StageRegistry;
