use super::{Handler, HandlerId};
use crate::utils::error::{AppError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type HandlerFactory = Box<dyn Fn() -> Result<Arc<dyn Handler>> + Send + Sync>;

/// Explicit lookup table from handler identifier to handler.
///
/// Handlers are built by their factory on resolution, so configuration a
/// handler needs is checked when the process starts rather than on the
/// first event.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: BTreeMap<HandlerId, HandlerFactory>,
    aliases: BTreeMap<HandlerId, HandlerId>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: HandlerId, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Arc<dyn Handler>> + Send + Sync + 'static,
    {
        if self.factories.insert(id.clone(), Box::new(factory)).is_some() {
            tracing::warn!("Handler {} registered twice; keeping the last one", id);
        }
        self
    }

    /// Registers an already-built handler.
    pub fn register_handler(&mut self, id: HandlerId, handler: Arc<dyn Handler>) -> &mut Self {
        self.register(id, move || Ok(handler.clone()))
    }

    /// Makes `alias` resolve to whatever `target` resolves to.
    pub fn alias(&mut self, alias: HandlerId, target: HandlerId) -> &mut Self {
        self.aliases.insert(alias, target);
        self
    }

    pub fn contains(&self, id: &HandlerId) -> bool {
        self.target_of(id)
            .map(|target| self.factories.contains_key(target))
            .unwrap_or(false)
    }

    /// Registered identifiers and aliases, sorted.
    pub fn handler_ids(&self) -> Vec<HandlerId> {
        let mut ids: Vec<HandlerId> = self
            .factories
            .keys()
            .chain(self.aliases.keys())
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn resolve(&self, id: &HandlerId) -> Result<Arc<dyn Handler>> {
        let target = self.target_of(id).ok_or_else(|| self.not_found(id))?;
        let factory = self
            .factories
            .get(target)
            .ok_or_else(|| self.not_found(id))?;

        if target != id {
            tracing::info!("Handler {} resolves to {}", id, target);
        }
        factory()
    }

    fn target_of<'a>(&'a self, id: &'a HandlerId) -> Option<&'a HandlerId> {
        if self.factories.contains_key(id) {
            return Some(id);
        }
        self.aliases.get(id)
    }

    fn not_found(&self, id: &HandlerId) -> AppError {
        let registered = self
            .handler_ids()
            .iter()
            .map(HandlerId::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        AppError::HandlerNotFound {
            handler: id.to_string(),
            registered,
        }
    }
}
