//! SSO login against an external OAuth-style identity provider.
//!
//! The broker never sees passwords. It redirects the browser to the
//! provider, trades the returned authorization code for a provider token,
//! and reads the profile from it. The anti-CSRF `state` parameter is a
//! one-time server-side record; replaying a callback is therefore
//! structurally impossible.

mod provider;
mod state;

pub use provider::{HttpIdentityProvider, IdentityProvider, SsoProfile};
pub use state::StateStore;
