//! Extensions: named bundles of behaviour contributed by overlays.
//!
//! An extension is aggregated from every overlay directory contributing its
//! name, plus any native [`Behavior`] registered for it at program start. Its
//! dependencies come from the `depends` lists of its manifests and from its
//! behaviour. [`ExtensionCache`] builds each extension once, resolving the
//! dependency graph and rejecting cycles.

mod behavior;
mod cache;
pub mod error;
mod extension;
mod manifest;

pub use crate::behavior::{Action, Behavior, Behaviors, Hook};
pub use crate::cache::{ExtensionCache, ExtensionSource};
pub use crate::extension::{Extension, Member, Order, SetupState};
pub use crate::manifest::Manifest;
