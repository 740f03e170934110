//! Renderers for a built desired state.
//!
//! - cloudformation: the template handed to the provisioning engine
//! - summary: human-readable dependency listing

pub mod cloudformation;
pub mod summary;

pub use cloudformation::render_template;
pub use summary::render_summary;
