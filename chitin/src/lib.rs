//! Load-time class-file rewriter enforcing per-module access rules.
//!
//! The transformer takes raw class-file bytes plus a rules snapshot and
//! splices checks around denied operations: call sites of denied methods
//! are redirected through synthesized proxies, denied methods get a check
//! prelude in their own body, and method-handle constants referencing
//! denied operations are retargeted. Classes that need no rewrite pass
//! through untouched.

pub mod errors;
pub mod raw;
pub mod rules;
pub mod transform;

pub(crate) mod utilities;

pub use errors::{Result, TransformError};
pub use rules::{ConstValue, DenyAction, HandleInfo, ModuleRules, Rule, TargetRules};
pub use transform::{transform, TransformOptions, Transformer};
