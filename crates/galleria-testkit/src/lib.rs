//! # Galleria Testkit
//!
//! Testing utilities for the Galleria archiver.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fake site**: [`FakeSite`], a scripted remote implementing `Fetcher`
//! - **Fixtures**: [`TestFixture`], a fake site wired to in-memory stores
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust
//! use galleria_core::CollectionType;
//! use galleria_testkit::TestFixture;
//!
//! let fixture = TestFixture::new(3);
//! fixture.site.post_many("alice", CollectionType::Gallery, ["1", "2", "3", "4"]);
//! let planner = fixture.planner();
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use galleria_testkit::generators::detail_record;
//!
//! proptest! {
//!     #[test]
//!     fn hash_is_deterministic(detail in detail_record()) {
//!         prop_assert_eq!(detail.revision_hash(), detail.clone().revision_hash());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod site;

pub use fixtures::{fast_scheduler_config, TestFixture};
pub use site::{FakeSite, SITE_URL};
