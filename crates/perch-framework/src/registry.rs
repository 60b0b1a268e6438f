//! The controller table.
//!
//! [`ControllerRegistry::register`] turns controller declarations into the
//! read-only table the dispatcher consults on every request. For each
//! controller it:
//!
//! 1. checks that the `extends` chain reaches the application's base;
//! 2. copies in the filters of every ancestor (nearest first) and then the
//!    default filters, skipping filters already present by identity and
//!    keeping the bucket each filter was first seen in;
//! 3. layers the rules: defaults < farthest ancestor < ... < parent < own;
//! 4. indexes the controller and its actions under lowercased keys.
//!
//! Registration is all-or-nothing: the first [`StructuralError`] aborts it
//! and no table is produced.

use std::collections::HashMap;
use std::sync::Arc;

use perch_core::StructuralError;
use tracing::{debug, info};

use crate::action::BoxedAction;
use crate::controller::ControllerDef;
use crate::filter::{FilterAttachment, FilterTarget, TargetKind};
use crate::filter_set::{FilterRules, FilterSet};

/// Name the default filters are attached under, for error messages.
const DEFAULT_FILTERS_TARGET: &str = "default filters";

/// A registered action.
#[derive(Clone)]
pub struct RegisteredAction {
    target: Arc<FilterTarget>,
    handler: BoxedAction,
}

impl RegisteredAction {
    pub fn target(&self) -> &Arc<FilterTarget> {
        &self.target
    }

    pub fn name(&self) -> &str {
        self.target.name()
    }

    pub fn handler(&self) -> &BoxedAction {
        &self.handler
    }
}

impl std::fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// A registered controller with its fully merged filter set.
#[derive(Debug, Clone)]
pub struct RegisteredController {
    target: Arc<FilterTarget>,
    actions: HashMap<String, RegisteredAction>,
}

impl RegisteredController {
    pub fn target(&self) -> &Arc<FilterTarget> {
        &self.target
    }

    pub fn name(&self) -> &str {
        self.target.name()
    }

    /// Looks an action up case-insensitively.
    pub fn action(&self, name: &str) -> Option<&RegisteredAction> {
        self.actions.get(&name.to_lowercase())
    }

    pub fn actions(&self) -> impl Iterator<Item = &RegisteredAction> {
        self.actions.values()
    }
}

/// Controllers indexed by lowercased name.
#[derive(Debug, Clone, Default)]
pub struct ControllerRegistry {
    controllers: HashMap<String, RegisteredController>,
}

impl ControllerRegistry {
    /// Builds the table from controller declarations and default filters.
    ///
    /// # Errors
    ///
    /// - [`StructuralError::MissingBaseController`] when a controller does
    ///   not extend `base`;
    /// - [`StructuralError::DuplicateController`] on a case-insensitive name
    ///   collision;
    /// - [`StructuralError::DuplicateAction`] on a case-insensitive action
    ///   name collision within one controller;
    /// - [`StructuralError::DuplicateFilter`] when the same filter appears
    ///   twice among the default filters.
    pub fn register(
        base: &Arc<ControllerDef>,
        controllers: impl IntoIterator<Item = Arc<ControllerDef>>,
        default_filters: impl IntoIterator<Item = FilterAttachment>,
    ) -> Result<Self, StructuralError> {
        let mut defaults = FilterSet::new();
        for attachment in default_filters {
            defaults.attach(attachment, DEFAULT_FILTERS_TARGET)?;
        }

        let mut table = HashMap::new();
        for def in controllers {
            let registered = Self::register_one(base, &def, &defaults)?;
            let key = def.name().to_lowercase();
            if table.contains_key(&key) {
                return Err(StructuralError::DuplicateController { name: key });
            }
            info!(
                controller = %def.name(),
                actions = registered.actions.len(),
                filters = registered.target.filters().len(),
                "Controller registered"
            );
            table.insert(key, registered);
        }

        Ok(Self { controllers: table })
    }

    fn register_one(
        base: &Arc<ControllerDef>,
        def: &ControllerDef,
        defaults: &FilterSet,
    ) -> Result<RegisteredController, StructuralError> {
        if !def.extends(base) {
            return Err(StructuralError::MissingBaseController {
                controller: def.name().to_string(),
            });
        }

        let mut filters = def.filters().clone();
        let ancestors: Vec<_> = def.ancestors().collect();
        for ancestor in &ancestors {
            filters.merge_inherited(ancestor.filters());
        }
        filters.merge_inherited(defaults);

        let layers = std::iter::once(defaults.rules())
            .chain(ancestors.iter().rev().map(|a| a.filters().rules()))
            .chain(std::iter::once(def.filters().rules()));
        filters.set_rules(FilterRules::layered(layers));

        let mut actions = HashMap::new();
        for action in def.actions() {
            let key = action.name().to_lowercase();
            if actions.contains_key(&key) {
                return Err(StructuralError::DuplicateAction {
                    controller: def.name().to_string(),
                    action: key,
                });
            }
            debug!(controller = %def.name(), action = %action.name(), "Action indexed");
            actions.insert(
                key,
                RegisteredAction {
                    target: Arc::new(FilterTarget::new(
                        TargetKind::Action,
                        action.name(),
                        action.filters().clone(),
                    )),
                    handler: Arc::clone(action.handler()),
                },
            );
        }

        Ok(RegisteredController {
            target: Arc::new(FilterTarget::new(
                TargetKind::Controller,
                def.name(),
                filters,
            )),
            actions,
        })
    }

    /// Looks a controller up case-insensitively.
    pub fn controller(&self, name: &str) -> Option<&RegisteredController> {
        self.controllers.get(&name.to_lowercase())
    }

    pub fn controllers(&self) -> impl Iterator<Item = &RegisteredController> {
        self.controllers.values()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use perch_core::http::Method;
    use serde_json::Value;

    use super::*;
    use crate::builtin::BuiltinFilters;
    use crate::controller::ActionDef;
    use crate::filter::{Filter, FilterProps, define_filter};
    use crate::filter_set::FilterState;

    async fn index() {}

    fn marker(name: &str) -> crate::filter::FilterDef<()> {
        define_filter(name.to_string(), |_s, _o: ()| {}, FilterProps::new())
    }

    fn names<'a>(filters: impl Iterator<Item = &'a Filter>) -> Vec<&'a str> {
        filters.map(Filter::name).collect()
    }

    #[test]
    fn child_inherits_parent_buckets() {
        let a = marker("A");
        let b = marker("B");
        let base = ControllerDef::base();
        let c1 = ControllerDef::builder("C1")
            .extends(&base)
            .filter(a.with_order((), 1))
            .build()
            .unwrap();
        let c2 = ControllerDef::builder("C2")
            .extends(&c1)
            .filter(b.with_order((), 2))
            .action("index", index)
            .build()
            .unwrap();

        let registry = ControllerRegistry::register(&base, [c2], []).unwrap();
        let set = registry.controller("c2").unwrap().target().filters();

        assert_eq!(set.len(), 2);
        assert_eq!(set.order_of(a.filter()), Some(1));
        assert_eq!(set.order_of(b.filter()), Some(2));
        assert_eq!(names(set.iter_descending()), vec!["B", "A"]);
    }

    #[test]
    fn siblings_do_not_share_inherited_sets() {
        let a = marker("A");
        let b = marker("B");
        let base = ControllerDef::base();
        let parent = ControllerDef::builder("Parent")
            .extends(&base)
            .filter(a.with(()))
            .build()
            .unwrap();
        let left = ControllerDef::builder("Left")
            .extends(&parent)
            .filter(b.with(()))
            .build()
            .unwrap();
        let right = ControllerDef::builder("Right")
            .extends(&parent)
            .build()
            .unwrap();

        let registry = ControllerRegistry::register(&base, [left, right], []).unwrap();
        assert_eq!(registry.controller("left").unwrap().target().filters().len(), 2);
        assert_eq!(registry.controller("right").unwrap().target().filters().len(), 1);
        assert_eq!(parent.filters().len(), 1);
    }

    #[test]
    fn default_filters_are_merged_last() {
        let a = marker("A");
        let d = marker("D");
        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .filter(a.with_order((), 3))
            .build()
            .unwrap();

        let registry =
            ControllerRegistry::register(&base, [user], [d.with_order((), 3), a.with_order((), 9)])
                .unwrap();
        let set = registry.controller("user").unwrap().target().filters();
        assert_eq!(names(set.filters().iter()), vec!["A", "D"]);
        assert_eq!(set.order_of(a.filter()), Some(3));
    }

    #[test]
    fn rules_layer_defaults_then_ancestors_then_own() {
        let tag = define_filter(
            "tag",
            |state: &mut FilterState, value: &'static str| {
                state.rules.set_value("tag", Value::from(value));
            },
            FilterProps::new(),
        );
        let level = define_filter(
            "level",
            |state: &mut FilterState, value: i64| {
                state.rules.set_value("level", Value::from(value));
            },
            FilterProps::new(),
        );
        let filters = BuiltinFilters::new();
        let base = ControllerDef::base();
        let api = ControllerDef::builder("Api")
            .extends(&base)
            .filter(tag.with("api"))
            .filter(filters.http_method.with(Method::GET))
            .build()
            .unwrap();
        let user = ControllerDef::builder("User")
            .extends(&api)
            .filter(filters.http_method.with([Method::GET, Method::POST]))
            .build()
            .unwrap();

        let registry = ControllerRegistry::register(
            &base,
            [user],
            [tag.with("default"), level.with(1i64)],
        )
        .unwrap();
        let rules = registry.controller("user").unwrap().target().rules().clone();
        assert_eq!(rules.get::<String>("tag").as_deref(), Some("api"));
        assert_eq!(rules.get::<i64>("level"), Some(1));
        assert_eq!(rules.http_method, Some(vec![Method::GET, Method::POST]));
    }

    #[test]
    fn controller_names_collide_case_insensitively() {
        let base = ControllerDef::base();
        let a = ControllerDef::builder("User").extends(&base).build().unwrap();
        let b = ControllerDef::builder("USER").extends(&base).build().unwrap();

        let err = ControllerRegistry::register(&base, [a, b], []).unwrap_err();
        assert_eq!(
            err,
            StructuralError::DuplicateController {
                name: "user".into()
            }
        );
    }

    #[test]
    fn action_names_collide_case_insensitively() {
        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .action("getInfo", index)
            .action("GETINFO", index)
            .build()
            .unwrap();

        let err = ControllerRegistry::register(&base, [user], []).unwrap_err();
        assert_eq!(
            err,
            StructuralError::DuplicateAction {
                controller: "User".into(),
                action: "getinfo".into(),
            }
        );
    }

    #[test]
    fn controllers_must_extend_the_base() {
        let base = ControllerDef::base();
        let stray = ControllerDef::builder("Stray").build().unwrap();
        let foreign = ControllerDef::builder("Foreign")
            .extends(&ControllerDef::base())
            .build()
            .unwrap();

        for def in [stray, foreign] {
            let name = def.name().to_string();
            let err = ControllerRegistry::register(&base, [def], []).unwrap_err();
            assert_eq!(
                err,
                StructuralError::MissingBaseController { controller: name }
            );
        }
    }

    #[test]
    fn duplicate_default_filters_are_rejected() {
        let d = marker("D");
        let base = ControllerDef::base();
        let err = ControllerRegistry::register(&base, [], [d.with(()), d.with(())]).unwrap_err();
        assert!(matches!(err, StructuralError::DuplicateFilter { .. }));
    }

    #[test]
    fn actions_keep_independent_sets() {
        let a = marker("A");
        let b = marker("B");
        let base = ControllerDef::base();
        let user = ControllerDef::builder("User")
            .extends(&base)
            .filter(a.with(()))
            .action("index", index)
            .action_with(ActionDef::builder("Save", index).filter(b.with(())))
            .build()
            .unwrap();

        let registry = ControllerRegistry::register(&base, [user], []).unwrap();
        let user = registry.controller("USER").unwrap();
        assert!(user.action("index").unwrap().target().filters().is_empty());

        let save = user.action("save").unwrap();
        assert_eq!(save.name(), "Save");
        assert!(save.target().filters().contains(b.filter()));
        assert!(!save.target().filters().contains(a.filter()));
        assert!(!user.target().filters().contains(b.filter()));
    }
}
