//! Shared handler state.

use std::sync::Arc;

use crate::domain::aggregates::ShippingPolicy;
use crate::services::auth::{IdentityVerifier, TokenService};
use crate::services::events::EventPublisher;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tokens: TokenService,
    /// Social login is disabled when unset.
    pub identity: Option<Arc<dyn IdentityVerifier>>,
    pub events: EventPublisher,
    pub shipping: ShippingPolicy,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, tokens: TokenService, events: EventPublisher, shipping: ShippingPolicy) -> Self {
        Self { store, tokens, identity: None, events, shipping }
    }

    pub fn with_identity(mut self, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.identity = Some(verifier);
        self
    }
}
