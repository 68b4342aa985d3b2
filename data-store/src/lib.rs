//! Centralized persistence layer backed by embedded SQLite.
//!
//! One database file per installation holds every durable entity: accounts,
//! tracked repos, PRs, scans, dupe groups with members, the pairwise
//! verification cache, and the job queue. WAL mode is enabled and foreign
//! keys are enforced.
//!
//! All mutations go through DAO methods on [`Database`] using short
//! transactions behind a connection mutex; the job queue's dequeue is a
//! single atomic claim statement (see `jobs`).

pub mod account;
pub mod db;
mod error;
pub mod groups;
pub mod jobs;
pub mod models;
pub mod pairwise;
pub mod prs;
pub mod repos;
pub mod scans;

pub use account::{
    Account, AccountConfig, EmbeddingSettings, GithubSettings, LlmSettings, ScanSettings,
    VectorStoreSettings,
};
pub use db::Database;
pub use error::{Result, StoreError};
pub use groups::{DupeGroupWithMembers, NewDupeGroup, NewGroupMember};
pub use jobs::NewJob;
pub use models::{
    DupeGroup, DupeGroupMember, Job, JobStatus, Pr, PrUpsert, Repo, Scan, ScanStatus,
};
