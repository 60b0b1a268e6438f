//! Notes Example
//!
//! A small note-taking service showing controllers, filters and hooks.
//!
//! # Routes
//!
//! ```text
//! GET  /                      -> index/index, service info
//! GET  /note/list             -> every note, newest first
//! GET  /note/get?id=1         -> one note
//! POST /note/create           -> { "title": "...", "body": "..." }, needs x-token
//! POST /note/remove?id=1      -> needs x-token
//! GET  /search/query?q=rust   -> only the latest search per visitor answers
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package notes
//! curl -H 'x-forwarded-proto: https' localhost:3000/note/list
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use perch::prelude::*;
use perch::runtime::UUID_COOKIE;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

const NOT_FOUND: i64 = 40400;
const UNAUTHORIZED: i64 = 40100;

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct Note {
    id: u64,
    title: String,
    body: String,
}

#[derive(Default)]
struct NoteStore {
    next_id: AtomicU64,
    notes: RwLock<BTreeMap<u64, Note>>,
}

impl NoteStore {
    fn insert(&self, title: String, body: String) -> Note {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let note = Note { id, title, body };
        self.notes.write().insert(id, note.clone());
        note
    }

    fn search(&self, query: &str) -> Vec<Note> {
        let query = query.to_lowercase();
        self.notes
            .read()
            .values()
            .filter(|n| n.title.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Requires `x-token` to match the token given at attachment time.
fn token_filter() -> FilterDef<String> {
    define_filter(
        "token",
        |state, token: String| state.rules.set_value("token", Value::String(token)),
        FilterProps::new()
            .default_order(10)
            .description("Rejects requests without the expected x-token header")
            .on_check_rule(|target, _names, ctx| async move {
                let expected: Option<String> = target.rules().get("token");
                match expected {
                    Some(token) if ctx.header("x-token") != Some(token.as_str()) => Err(
                        DispatchError::json(JsonBody::error(UNAUTHORIZED, String::new())),
                    ),
                    _ => Ok(()),
                }
            }),
    )
}

// ============================================================================
// Actions
// ============================================================================

async fn index(scope: ActionScope) -> JsonBody {
    JsonBody::success(json!({
        "service": "notes",
        "defaults": scope.default_config(),
    }))
}

#[derive(Deserialize)]
struct ById {
    id: u64,
}

#[derive(Deserialize)]
struct NewNote {
    title: String,
    #[serde(default)]
    body: String,
}

#[derive(Deserialize)]
struct Query {
    q: String,
}

fn note_controller(
    base: &Arc<ControllerDef>,
    builtins: &BuiltinFilters,
    store: &Arc<NoteStore>,
) -> Result<Arc<ControllerDef>> {
    let token = token_filter();

    let list = {
        let store = store.clone();
        move || {
            let store = store.clone();
            async move {
                let notes: Vec<Note> = store.notes.read().values().rev().cloned().collect();
                ActionResult::json(notes)
            }
        }
    };

    let get = {
        let store = store.clone();
        move |Args(ById { id }): Args<ById>| {
            let store = store.clone();
            async move {
                match store.notes.read().get(&id) {
                    Some(note) => ActionResult::json(note),
                    None => Ok(ActionResult::json_with(JsonBody::error(NOT_FOUND, ""))),
                }
            }
        }
    };

    let create = {
        let store = store.clone();
        move |Args(new): Args<NewNote>| {
            let store = store.clone();
            async move {
                if new.title.trim().is_empty() {
                    return Err(DispatchError::status_msg(
                        StatusCode::BAD_REQUEST,
                        "title is required",
                    ));
                }
                let note = store.insert(new.title, new.body);
                info!(id = note.id, "Note created");
                ActionResult::json(note)
            }
        }
    };

    let remove = {
        let store = store.clone();
        move |Args(ById { id }): Args<ById>| {
            let store = store.clone();
            async move {
                match store.notes.write().remove(&id) {
                    Some(_) => JsonBody::success(json!({ "removed": id })),
                    None => JsonBody::error(NOT_FOUND, ""),
                }
            }
        }
    };

    let controller = ControllerDef::builder("note")
        .extends(base)
        .filter(builtins.description.with("Notes"))
        .action_with(ActionDef::builder("list", list).filter(builtins.http_method.with(Method::GET)))
        .action_with(ActionDef::builder("get", get).filter(builtins.http_method.with(Method::GET)))
        .action_with(
            ActionDef::builder("create", create)
                .filter(builtins.http_method.with(Method::POST))
                .filter(token.with("secret")),
        )
        .action_with(
            ActionDef::builder("remove", remove)
                .filter(builtins.http_method.with(Method::POST))
                .filter(token.with("secret")),
        )
        .build()?;
    Ok(controller)
}

/// Per-visitor search where a newer query supersedes a slower older one.
#[derive(Clone, Default)]
struct Searches {
    coordinator: AsyncCoordinator,
    keys: Arc<Mutex<HashMap<String, GroupKey>>>,
}

impl Searches {
    fn key_for(&self, visitor: &str) -> GroupKey {
        *self
            .keys
            .lock()
            .entry(visitor.to_string())
            .or_insert_with(GroupKey::unique)
    }
}

fn search_controller(
    base: &Arc<ControllerDef>,
    store: &Arc<NoteStore>,
    searches: Searches,
) -> Result<Arc<ControllerDef>> {
    let store = store.clone();
    let query = move |Args(Query { q }): Args<Query>, ctx: Arc<RequestContext>| {
        let store = store.clone();
        let searches = searches.clone();
        async move {
            let visitor = ctx.cookie(UUID_COOKIE).unwrap_or_default().to_string();
            let key = searches.key_for(&visitor);
            let task = async move {
                // Longer queries are cheaper, like a real index.
                let delay = 400u64.saturating_sub(q.len() as u64 * 50);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, DispatchError>(store.search(&q))
            };
            let hits = searches
                .coordinator
                .run(task, RunOptions::new().action(RunAction::Break).key(key))
                .await?;
            ActionResult::json(hits)
        }
    };

    let controller = ControllerDef::builder("search")
        .extends(base)
        .action("query", query)
        .build()?;
    Ok(controller)
}

// ============================================================================
// Hooks
// ============================================================================

struct NotesHooks;

#[async_trait]
impl AppHooks for NotesHooks {
    async fn on_post_init(&self, config: &PerchConfig) -> Result<(), perch::core::BoxError> {
        info!(addr = %config.server.bind_addr(), "Notes service ready");
        Ok(())
    }

    async fn on_request_error(&self, err: &DispatchError, ctx: &Arc<RequestContext>) {
        warn!(path = %ctx.path(), error = %err, "Request failed");
    }

    async fn on_end(&self) {
        info!("Notes service stopped");
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let app = PerchApp::new();

    let store = Arc::new(NoteStore::default());
    store.insert("Welcome".into(), "Try POST /note/create with x-token: secret".into());

    let index = ControllerDef::builder("index")
        .extends(app.base_controller())
        .action("index", index)
        .build()?;
    let notes = note_controller(app.base_controller(), app.builtins(), &store)?;
    let search = search_controller(app.base_controller(), &store, Searches::default())?;

    app.controllers([index, notes, search])
        .hooks(NotesHooks)
        .run()
        .await?;

    Ok(())
}
