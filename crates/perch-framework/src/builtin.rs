//! Filters every application gets out of the box.
//!
//! Filter identity matters for duplicate detection, so an application should
//! create its [`BuiltinFilters`] once and hand the same definitions to every
//! controller.

use perch_core::http::Method;
use perch_core::{DispatchError, StatusError};

use crate::filter::{FilterDef, FilterProps, define_filter};

/// Order of the HTTP method filter: always checked first.
pub const HTTP_METHOD_FILTER_ORDER: i64 = i64::MAX;

// =============================================================================
// Description
// =============================================================================

/// Option of [`description_filter`]: a bare name or a name plus description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Description {
    Name(String),
    Full { name: String, desc: String },
}

impl From<&str> for Description {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Description {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<(&str, &str)> for Description {
    fn from((name, desc): (&str, &str)) -> Self {
        Self::Full {
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }
}

/// Records a display name and description on the target.
pub fn description_filter() -> FilterDef<Description> {
    define_filter(
        "description",
        |state, option: Description| match option {
            Description::Name(name) => state.info.name = Some(name),
            Description::Full { name, desc } => {
                state.info.name = Some(name);
                state.info.desc = Some(desc);
            }
        },
        FilterProps::new().description("Names and describes a controller or action"),
    )
}

// =============================================================================
// HTTP method
// =============================================================================

/// Option of [`http_method_filter`]: the allowed methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMethods(pub Vec<Method>);

impl HttpMethods {
    /// Parses method names case-insensitively; unparseable names are skipped.
    pub fn parse<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            names
                .into_iter()
                .filter_map(|name| Method::from_bytes(name.to_ascii_uppercase().as_bytes()).ok())
                .collect(),
        )
    }
}

impl From<Method> for HttpMethods {
    fn from(method: Method) -> Self {
        Self(vec![method])
    }
}

impl From<Vec<Method>> for HttpMethods {
    fn from(methods: Vec<Method>) -> Self {
        Self(methods)
    }
}

impl<const N: usize> From<[Method; N]> for HttpMethods {
    fn from(methods: [Method; N]) -> Self {
        Self(methods.to_vec())
    }
}

impl From<&str> for HttpMethods {
    fn from(name: &str) -> Self {
        Self::parse([name])
    }
}

/// Restricts a target to the given methods; anything else is a 404.
///
/// An empty method list rejects every request.
pub fn http_method_filter() -> FilterDef<HttpMethods> {
    define_filter(
        "http_method",
        |state, methods: HttpMethods| state.rules.http_method = Some(methods.0),
        FilterProps::new()
            .default_order(HTTP_METHOD_FILTER_ORDER)
            .description("Rejects requests whose method is not allowed")
            .on_check_rule(|target, _names, ctx| async move {
                if let Some(allowed) = &target.rules().http_method
                    && !allowed.contains(ctx.method())
                {
                    return Err(DispatchError::Status(StatusError::not_found()));
                }
                Ok(())
            }),
    )
}

/// One instance of each built-in filter.
#[derive(Debug, Clone)]
pub struct BuiltinFilters {
    pub description: FilterDef<Description>,
    pub http_method: FilterDef<HttpMethods>,
}

impl BuiltinFilters {
    pub fn new() -> Self {
        Self {
            description: description_filter(),
            http_method: http_method_filter(),
        }
    }
}

impl Default for BuiltinFilters {
    fn default() -> Self {
        Self::new()
    }
}
