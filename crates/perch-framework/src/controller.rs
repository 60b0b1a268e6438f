//! Controller and action definitions.
//!
//! A controller is declared once with [`ControllerDef::builder`], which
//! records its parent, its own filters and its actions. Nothing is inherited
//! at this point: parent and default filters are merged in by
//! [`ControllerRegistry::register`](crate::registry::ControllerRegistry::register).
//!
//! Every application owns exactly one base controller
//! ([`ControllerDef::base`]); registration rejects controllers whose
//! `extends` chain does not reach it.
//!
//! # Example
//!
//! ```rust,ignore
//! let base = ControllerDef::base();
//!
//! let api = ControllerDef::builder("Api")
//!     .extends(&base)
//!     .filter(filters.http_method.with(Method::GET))
//!     .build()?;
//!
//! let user = ControllerDef::builder("User")
//!     .extends(&api)
//!     .filter(filters.description.with("User"))
//!     .action("getInfo", get_info)
//!     .action_with(
//!         ActionDef::builder("save", save).filter(filters.http_method.with(Method::POST)),
//!     )
//!     .build()?;
//! ```

use std::sync::Arc;

use perch_core::StructuralError;

use crate::action::{Action, BoxedAction, into_action};
use crate::filter::FilterAttachment;
use crate::filter_set::FilterSet;

/// Name of the controller returned by [`ControllerDef::base`].
pub const BASE_CONTROLLER_NAME: &str = "BaseController";

// =============================================================================
// Actions
// =============================================================================

/// An action as declared on its controller.
#[derive(Clone)]
pub struct ActionDef {
    name: String,
    handler: BoxedAction,
    filters: FilterSet,
}

impl ActionDef {
    pub fn builder<F, T>(name: impl Into<String>, handler: F) -> ActionBuilder
    where
        F: Action<T>,
        T: 'static,
    {
        ActionBuilder {
            def: ActionDef {
                name: name.into(),
                handler: into_action(handler),
                filters: FilterSet::new(),
            },
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &BoxedAction {
        &self.handler
    }

    /// The action's own filters; never contains controller filters.
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }
}

impl std::fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDef")
            .field("name", &self.name)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// Builder for an [`ActionDef`] carrying its own filters.
pub struct ActionBuilder {
    def: ActionDef,
    error: Option<StructuralError>,
}

impl ActionBuilder {
    /// Attaches a filter to this action only.
    pub fn filter(mut self, attachment: FilterAttachment) -> Self {
        if self.error.is_none()
            && let Err(e) = self.def.filters.attach(attachment, &self.def.name)
        {
            self.error = Some(e);
        }
        self
    }

    pub fn build(self) -> Result<ActionDef, StructuralError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.def),
        }
    }
}

// =============================================================================
// Controllers
// =============================================================================

/// A controller declaration.
pub struct ControllerDef {
    name: String,
    parent: Option<Arc<ControllerDef>>,
    filters: FilterSet,
    actions: Vec<ActionDef>,
}

impl ControllerDef {
    /// Creates a fresh base controller. It has no parent, filters or actions.
    pub fn base() -> Arc<Self> {
        Arc::new(Self {
            name: BASE_CONTROLLER_NAME.to_string(),
            parent: None,
            filters: FilterSet::new(),
            actions: Vec::new(),
        })
    }

    pub fn builder(name: impl Into<String>) -> ControllerBuilder {
        ControllerBuilder {
            name: name.into(),
            parent: None,
            filters: FilterSet::new(),
            actions: Vec::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<ControllerDef>> {
        self.parent.as_ref()
    }

    /// The controller's own filters, without anything inherited.
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn actions(&self) -> &[ActionDef] {
        &self.actions
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &Arc<ControllerDef>> {
        std::iter::successors(self.parent.as_ref(), |c| c.parent.as_ref())
    }

    /// Whether `base` is a (possibly indirect) ancestor of this controller.
    pub fn extends(&self, base: &Arc<ControllerDef>) -> bool {
        self.ancestors().any(|c| Arc::ptr_eq(c, base))
    }
}

impl std::fmt::Debug for ControllerDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerDef")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("filters", &self.filters)
            .field("actions", &self.actions)
            .finish()
    }
}

/// Builder for a [`ControllerDef`].
///
/// Filter attachment errors are held until [`build`](Self::build).
pub struct ControllerBuilder {
    name: String,
    parent: Option<Arc<ControllerDef>>,
    filters: FilterSet,
    actions: Vec<ActionDef>,
    error: Option<StructuralError>,
}

impl ControllerBuilder {
    pub fn extends(mut self, parent: &Arc<ControllerDef>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    /// Attaches a filter to the controller.
    pub fn filter(mut self, attachment: FilterAttachment) -> Self {
        if self.error.is_none()
            && let Err(e) = self.filters.attach(attachment, &self.name)
        {
            self.error = Some(e);
        }
        self
    }

    /// Adds an action without filters of its own.
    pub fn action<F, T>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Action<T>,
        T: 'static,
    {
        self.actions.push(ActionDef {
            name: name.into(),
            handler: into_action(handler),
            filters: FilterSet::new(),
        });
        self
    }

    /// Adds an action built with [`ActionDef::builder`].
    pub fn action_with(mut self, action: ActionBuilder) -> Self {
        match action.build() {
            Ok(def) => self.actions.push(def),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    pub fn build(self) -> Result<Arc<ControllerDef>, StructuralError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(Arc::new(ControllerDef {
            name: self.name,
            parent: self.parent,
            filters: self.filters,
            actions: self.actions,
        }))
    }
}
