//! # Promotion Configuration
//!
//! - **Promote config** (`.jx/promote.yaml`): how an environment repository
//!   is mutated, one rule per repository
//! - **Discovery**: picks the rule for a checkout, explicit config first,
//!   then the chart layout, then helmfiles
//! - **Requirements** (`jx-requirements.yml`): environments when the
//!   cluster is not queried
//! - **Options**: the resolved settings of a run
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let discovered = discover(&checkout, "jx-staging")?;
//! rules::apply(&discovered.config.rule, &ctx).await?;
//! ```

pub mod discovery;
pub mod options;
pub mod promote;
pub mod requirements;
