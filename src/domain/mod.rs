//! # Domain Entities
//!
//! Users, pads, and pad templates, with repository traits at the
//! persistence seam. Production repositories live in `crate::db`;
//! in-memory implementations back the tests.

pub mod pad;
pub mod template;
pub mod user;

pub use pad::{InMemoryPadRepository, Pad, PadRepository, PadSummary, SharingPolicy};
pub use template::{
    load_templates_from_dir, InMemoryTemplateRepository, TemplatePad, TemplateRepository,
};
pub use user::{ensure_user_from_claims, user_id_for_sub, InMemoryUserRepository, User, UserRepository};
