//! Predicate subsystem.
//!
//! # Data Flow
//! ```text
//! Subscription construction:
//!     BindConfig[] → locator.rs (parse paths) → BindPredicate[]
//!
//! Inbound call (headers, normalized body):
//!     → engine.rs (evaluate every predicate, AND)
//!     → Return: match / no match
//! ```
//!
//! # Design Decisions
//! - Locators compiled at construction, immutable at runtime
//! - No dynamic path evaluation: explicit segment interpreter
//! - Pure functions, no side effects beyond trace logging

pub mod engine;
pub mod locator;

pub use engine::{matches, BindPredicate, PredicateSource};
pub use locator::{Locator, LocatorError, Segment};
