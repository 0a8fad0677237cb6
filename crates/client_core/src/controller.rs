//! Owner of the session catalog.
//!
//! Every mutation goes through [`CatalogController`]. Each operation picks its
//! own reconciliation policy:
//!
//! - expansion toggles are applied before the request and silently reverted
//!   when it fails;
//! - creates, renames, edits, moves and deletes touch local state only after
//!   the server confirmed them, and failures are surfaced as alerts;
//! - an embed failure downgrades the link immediately and persists the
//!   downgrade in the background without any rollback.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use shared::{
    domain::{Category, CategoryId, Link, LinkId, OpenMode},
    protocol::{CategoryPatch, LinkPatch, NewCategory, NewLink},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::{
    api::CatalogApi,
    catalog::Catalog,
    defaults::default_catalog,
    error::SyncError,
    frame_loader::{AttemptId, FrameEvent, FrameLoader},
};

pub const CONFIRM_DELETE_CATEGORY: &str = "Delete this category and all its links?";
pub const CONFIRM_DELETE_LINK: &str = "Delete this link?";

#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSource {
    Remote,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    External { url: String },
    Embedded { attempt: AttemptId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    CatalogReplaced { source: CatalogSource },
    CategoryChanged { category_id: CategoryId },
    CategoryRemoved { category_id: CategoryId },
    LinkChanged { link_id: LinkId },
    LinkRemoved { link_id: LinkId },
    OpenExternal { url: String },
    EmbedStarted { link_id: LinkId, attempt: AttemptId },
    EmbedLoaded { link_id: LinkId },
    EmbedBlocked { link_id: LinkId },
    Alert { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLinkDraft {
    pub name: String,
    pub url: String,
    pub open_mode: OpenMode,
    pub iframe_compatible: bool,
}

impl NewLinkDraft {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            open_mode: OpenMode::App,
            iframe_compatible: true,
        }
    }
}

/// A field written before its remote call resolved.
#[derive(Debug, Clone, Copy)]
struct OptimisticEdit<T> {
    prior: T,
    applied: T,
    rollback_on_failure: bool,
}

impl<T: Copy + PartialEq> OptimisticEdit<T> {
    fn apply(slot: &mut T, value: T, rollback_on_failure: bool) -> Self {
        let prior = *slot;
        *slot = value;
        Self {
            prior,
            applied: value,
            rollback_on_failure,
        }
    }

    /// Restores the prior value unless a later write already replaced ours.
    fn rollback(&self, slot: &mut T) -> bool {
        if !self.rollback_on_failure || *slot != self.applied {
            return false;
        }
        *slot = self.prior;
        true
    }
}

#[derive(Debug, Clone)]
struct ActiveEmbed {
    link_id: LinkId,
    attempt: AttemptId,
}

#[derive(Default)]
struct ControllerState {
    catalog: Catalog,
    active: Option<ActiveEmbed>,
    // Link behind every attempt started here that has not reported yet.
    attempts: BTreeMap<AttemptId, LinkId>,
    loaded: bool,
}

impl ControllerState {
    /// Takes the link of `attempt`. Older attempts can no longer report, since
    /// the loader only signals its current attempt, so they are dropped too.
    fn claim_attempt(&mut self, attempt: AttemptId) -> Option<LinkId> {
        let link_id = self.attempts.remove(&attempt);
        self.attempts = self.attempts.split_off(&attempt);
        link_id
    }

    fn active_for(&self, attempt: AttemptId) -> Option<LinkId> {
        self.active
            .as_ref()
            .filter(|active| active.attempt == attempt)
            .map(|active| active.link_id.clone())
    }
}

pub struct CatalogController {
    api: Arc<dyn CatalogApi>,
    frame: FrameLoader,
    confirm: Arc<dyn ConfirmPrompt>,
    fallback: Vec<Category>,
    inner: Mutex<ControllerState>,
    background: Mutex<JoinSet<()>>,
    closed: AtomicBool,
    events: broadcast::Sender<CatalogEvent>,
}

fn unknown_category(id: &CategoryId) -> SyncError {
    SyncError::skipped(format!("unknown category {id}"))
}

fn unknown_link(id: &LinkId) -> SyncError {
    SyncError::skipped(format!("unknown link {id}"))
}

fn required(value: &str, field: &str) -> Result<String, SyncError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SyncError::skipped(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

impl CatalogController {
    pub fn new(
        api: Arc<dyn CatalogApi>,
        frame: FrameLoader,
        confirm: Arc<dyn ConfirmPrompt>,
    ) -> Arc<Self> {
        Self::new_with_fallback(api, frame, confirm, default_catalog())
    }

    pub fn new_with_fallback(
        api: Arc<dyn CatalogApi>,
        frame: FrameLoader,
        confirm: Arc<dyn ConfirmPrompt>,
        fallback: Vec<Category>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            api,
            frame,
            confirm,
            fallback,
            inner: Mutex::new(ControllerState::default()),
            background: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    pub fn frame(&self) -> &FrameLoader {
        &self.frame
    }

    pub async fn catalog(&self) -> Catalog {
        self.inner.lock().await.catalog.clone()
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.lock().await.loaded
    }

    pub async fn active_link(&self) -> Option<LinkId> {
        self.inner
            .lock()
            .await
            .active
            .as_ref()
            .map(|active| active.link_id.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the view as gone. Requests still in flight resolve without
    /// touching local state.
    pub fn teardown(&self) {
        self.closed.store(true, Ordering::Release);
        self.frame.teardown();
        debug!("catalog controller torn down");
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::ViewClosed);
        }
        Ok(())
    }

    fn emit(&self, event: CatalogEvent) {
        let _ = self.events.send(event);
    }

    fn surface(&self, error: SyncError) -> SyncError {
        error!(
            operation = error.operation().unwrap_or("unknown"),
            %error,
            "catalog operation failed"
        );
        if !self.is_closed() {
            self.emit(CatalogEvent::Alert {
                message: error.user_message(),
            });
        }
        error
    }

    /// Fetches the catalog, falling back to the built-in one when the server
    /// cannot provide it.
    pub async fn load_catalog(&self) -> Result<CatalogSource, SyncError> {
        let (categories, source) = match self.api.fetch_catalog().await {
            Ok(categories) => (categories, CatalogSource::Remote),
            Err(error) => {
                warn!(%error, "catalog fetch failed; showing built-in catalog");
                (self.fallback.clone(), CatalogSource::Fallback)
            }
        };
        self.ensure_open()?;

        let mut state = self.inner.lock().await;
        state.catalog = Catalog::from_categories(categories);
        state.loaded = true;
        let active_gone = state
            .active
            .as_ref()
            .is_some_and(|active| state.catalog.link(&active.link_id).is_none());
        if active_gone {
            state.active = None;
            self.frame.teardown();
        }
        info!(
            categories = state.catalog.categories().len(),
            ?source,
            "catalog loaded"
        );
        drop(state);

        self.emit(CatalogEvent::CatalogReplaced { source });
        Ok(source)
    }

    pub async fn reload(&self) -> Result<CatalogSource, SyncError> {
        self.load_catalog().await
    }

    /// Flips `expanded` immediately; a failed update reverts it without an
    /// alert. Returns the value left in local state.
    pub async fn toggle_category(&self, id: &CategoryId) -> Result<bool, SyncError> {
        let edit = {
            let mut state = self.inner.lock().await;
            let category = state
                .catalog
                .category_mut(id)
                .ok_or_else(|| unknown_category(id))?;
            let expanded = !category.expanded;
            OptimisticEdit::apply(&mut category.expanded, expanded, true)
        };
        self.emit(CatalogEvent::CategoryChanged {
            category_id: id.clone(),
        });

        let patch = CategoryPatch::expanded(edit.applied);
        let Err(error) = self.api.update_category(id, &patch).await else {
            return Ok(edit.applied);
        };
        warn!(category_id = %id, %error, "expansion update failed; reverting");
        self.ensure_open()?;

        let mut state = self.inner.lock().await;
        let Some(category) = state.catalog.category_mut(id) else {
            return Ok(edit.prior);
        };
        let reverted = edit.rollback(&mut category.expanded);
        let expanded = category.expanded;
        drop(state);
        if reverted {
            self.emit(CatalogEvent::CategoryChanged {
                category_id: id.clone(),
            });
        }
        Ok(expanded)
    }

    pub async fn create_category(&self, name: &str) -> Result<Category, SyncError> {
        let name = required(name, "category name")?;
        let body = NewCategory {
            name,
            expanded: Some(true),
            sort_order: None,
        };
        let category = self
            .api
            .create_category(&body)
            .await
            .map_err(|error| self.surface(error))?;
        self.ensure_open()?;

        self.inner
            .lock()
            .await
            .catalog
            .insert_category(category.clone());
        info!(category_id = %category.id, "category created");
        self.emit(CatalogEvent::CategoryChanged {
            category_id: category.id.clone(),
        });
        Ok(category)
    }

    pub async fn rename_category(&self, id: &CategoryId, name: &str) -> Result<(), SyncError> {
        let name = required(name, "category name")?;
        self.require_category(id).await?;

        let patch = CategoryPatch {
            name: Some(name.clone()),
            ..CategoryPatch::default()
        };
        self.api
            .update_category(id, &patch)
            .await
            .map_err(|error| self.surface(error))?;
        self.ensure_open()?;

        if let Some(category) = self.inner.lock().await.catalog.category_mut(id) {
            category.name = name;
        }
        self.emit(CatalogEvent::CategoryChanged {
            category_id: id.clone(),
        });
        Ok(())
    }

    pub async fn move_category(&self, id: &CategoryId, sort_order: i64) -> Result<(), SyncError> {
        self.require_category(id).await?;

        let patch = CategoryPatch {
            sort_order: Some(sort_order),
            ..CategoryPatch::default()
        };
        self.api
            .update_category(id, &patch)
            .await
            .map_err(|error| self.surface(error))?;
        self.ensure_open()?;

        self.inner
            .lock()
            .await
            .catalog
            .reposition_category(id, sort_order);
        self.emit(CatalogEvent::CategoryChanged {
            category_id: id.clone(),
        });
        Ok(())
    }

    /// Deletes a category and its links after the user confirmed and the
    /// server acknowledged.
    pub async fn delete_category(&self, id: &CategoryId) -> Result<DeleteOutcome, SyncError> {
        self.require_category(id).await?;
        if !self.confirm.confirm(CONFIRM_DELETE_CATEGORY).await {
            debug!(category_id = %id, "category delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }

        self.api
            .delete_category(id)
            .await
            .map_err(|error| self.surface(error))?;
        self.ensure_open()?;

        let mut state = self.inner.lock().await;
        let removed = state.catalog.remove_category(id);
        let active_removed = match (&state.active, &removed) {
            (Some(active), Some(category)) => category
                .links
                .iter()
                .any(|link| link.id == active.link_id),
            _ => false,
        };
        if active_removed {
            state.active = None;
            self.frame.teardown();
        }
        drop(state);

        info!(category_id = %id, "category deleted");
        self.emit(CatalogEvent::CategoryRemoved {
            category_id: id.clone(),
        });
        Ok(DeleteOutcome::Deleted)
    }

    /// Adds a link once the server returned it with its id. Empty names or
    /// urls are rejected before any request.
    pub async fn create_link(
        &self,
        category_id: &CategoryId,
        draft: NewLinkDraft,
    ) -> Result<Link, SyncError> {
        let name = required(&draft.name, "link name")?;
        let url = required(&draft.url, "link url")?;
        self.require_category(category_id).await?;

        let body = NewLink {
            category_id: category_id.clone(),
            name,
            url,
            open_mode: draft.open_mode,
            iframe_compatible: draft.iframe_compatible,
            sort_order: None,
        };
        let link = self
            .api
            .create_link(&body)
            .await
            .map_err(|error| self.surface(error))?;
        self.ensure_open()?;

        let inserted = self.inner.lock().await.catalog.insert_link(link.clone());
        if inserted.is_err() {
            warn!(
                link_id = %link.id,
                category_id = %link.category_id,
                "created link has no local category"
            );
        } else {
            info!(link_id = %link.id, "link created");
            self.emit(CatalogEvent::LinkChanged {
                link_id: link.id.clone(),
            });
        }
        Ok(link)
    }

    pub async fn update_link(&self, id: &LinkId, mut patch: LinkPatch) -> Result<(), SyncError> {
        if patch.is_empty() {
            return Err(SyncError::skipped("no link fields to update"));
        }
        if let Some(name) = patch.name.as_deref() {
            patch.name = Some(required(name, "link name")?);
        }
        if let Some(url) = patch.url.as_deref() {
            patch.url = Some(required(url, "link url")?);
        }
        self.require_link(id).await?;

        self.api
            .update_link(id, &patch)
            .await
            .map_err(|error| self.surface(error))?;
        self.ensure_open()?;

        let mut state = self.inner.lock().await;
        if let Some(link) = state.catalog.link_mut(id) {
            if let Some(name) = patch.name {
                link.name = name;
            }
            if let Some(url) = patch.url {
                link.url = url;
            }
            if let Some(open_mode) = patch.open_mode {
                link.open_mode = open_mode;
            }
            if let Some(iframe_compatible) = patch.iframe_compatible {
                link.iframe_compatible = iframe_compatible;
            }
        }
        if let Some(sort_order) = patch.sort_order {
            state.catalog.reposition_link(id, sort_order);
        }
        drop(state);

        self.emit(CatalogEvent::LinkChanged {
            link_id: id.clone(),
        });
        Ok(())
    }

    pub async fn move_link(&self, id: &LinkId, sort_order: i64) -> Result<(), SyncError> {
        self.update_link(
            id,
            LinkPatch {
                sort_order: Some(sort_order),
                ..LinkPatch::default()
            },
        )
        .await
    }

    pub async fn delete_link(&self, id: &LinkId) -> Result<DeleteOutcome, SyncError> {
        self.require_link(id).await?;
        if !self.confirm.confirm(CONFIRM_DELETE_LINK).await {
            debug!(link_id = %id, "link delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }

        self.api
            .delete_link(id)
            .await
            .map_err(|error| self.surface(error))?;
        self.ensure_open()?;

        let mut state = self.inner.lock().await;
        state.catalog.remove_link(id);
        if state
            .active
            .as_ref()
            .is_some_and(|active| &active.link_id == id)
        {
            state.active = None;
            self.frame.teardown();
        }
        drop(state);

        info!(link_id = %id, "link deleted");
        self.emit(CatalogEvent::LinkRemoved {
            link_id: id.clone(),
        });
        Ok(DeleteOutcome::Deleted)
    }

    /// Routes a link either to an external navigation or to the embedded
    /// frame. Tab links and links known to refuse framing never reach the
    /// frame.
    pub async fn activate_link(&self, id: &LinkId) -> Result<Activation, SyncError> {
        self.ensure_open()?;
        let mut state = self.inner.lock().await;
        let link = state.catalog.link(id).cloned().ok_or_else(|| unknown_link(id))?;

        if !link.embeddable() {
            drop(state);
            debug!(link_id = %id, url = %link.url, "opening link externally");
            self.emit(CatalogEvent::OpenExternal {
                url: link.url.clone(),
            });
            return Ok(Activation::External { url: link.url });
        }

        let attempt = self.frame.navigate(link.url.clone(), link.name.clone());
        state.attempts.insert(attempt, id.clone());
        state.active = Some(ActiveEmbed {
            link_id: id.clone(),
            attempt,
        });
        drop(state);

        debug!(link_id = %id, attempt = attempt.get(), "embedding link");
        self.emit(CatalogEvent::EmbedStarted {
            link_id: id.clone(),
            attempt,
        });
        Ok(Activation::Embedded { attempt })
    }

    /// Applies one frame outcome. A blocked attempt marks the link it was
    /// started for as not embeddable right away, even if another link has
    /// been activated since, and persists that in the background.
    pub async fn handle_frame_event(&self, event: FrameEvent) {
        if self.is_closed() {
            return;
        }
        let attempt = match event {
            FrameEvent::Loaded { attempt, .. } => {
                debug!(attempt = attempt.get(), "embedded link loaded");
                let loaded = {
                    let mut state = self.inner.lock().await;
                    state.claim_attempt(attempt);
                    state.active_for(attempt)
                };
                if let Some(link_id) = loaded {
                    self.emit(CatalogEvent::EmbedLoaded { link_id });
                }
                return;
            }
            FrameEvent::Blocked {
                attempt, reason, ..
            } => {
                debug!(attempt = attempt.get(), ?reason, "embedded link blocked");
                attempt
            }
        };

        let link_id = {
            let mut state = self.inner.lock().await;
            let Some(link_id) = state.claim_attempt(attempt) else {
                debug!(attempt = attempt.get(), "ignoring blocked signal for unknown attempt");
                return;
            };
            let Some(link) = state.catalog.link_mut(&link_id) else {
                debug!(link_id = %link_id, "blocked link is no longer in the catalog");
                return;
            };
            let downgrade = OptimisticEdit::apply(&mut link.iframe_compatible, false, false);
            debug!(
                link_id = %link_id,
                was_compatible = downgrade.prior,
                "link marked not embeddable"
            );
            link_id
        };

        let api = Arc::clone(&self.api);
        let persisted_id = link_id.clone();
        let mut background = self.background.lock().await;
        while let Some(result) = background.try_join_next() {
            if let Err(err) = result {
                warn!(%err, "background persistence task did not finish");
            }
        }
        background.spawn(async move {
            let patch = LinkPatch::iframe_compatible(false);
            match api.update_link(&persisted_id, &patch).await {
                Ok(()) => debug!(link_id = %persisted_id, "embed downgrade persisted"),
                Err(error) => {
                    warn!(link_id = %persisted_id, %error, "failed to persist embed downgrade")
                }
            }
        });
        drop(background);
        self.emit(CatalogEvent::EmbedBlocked { link_id });
    }

    /// Feeds frame outcomes into this controller until the loader or the
    /// controller goes away.
    pub fn spawn_frame_event_task(
        self: &Arc<Self>,
        mut frame_events: mpsc::UnboundedReceiver<FrameEvent>,
    ) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = frame_events.recv().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.handle_frame_event(event).await;
            }
        })
    }

    pub async fn settle(&self) {
        let mut tasks = std::mem::take(&mut *self.background.lock().await);
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                warn!(%err, "background persistence task did not finish");
            }
        }
    }

    #[cfg(test)]
    async fn background_tasks(&self) -> usize {
        self.background.lock().await.len()
    }

    async fn require_category(&self, id: &CategoryId) -> Result<(), SyncError> {
        self.ensure_open()?;
        if self.inner.lock().await.catalog.category(id).is_none() {
            return Err(unknown_category(id));
        }
        Ok(())
    }

    async fn require_link(&self, id: &LinkId) -> Result<(), SyncError> {
        self.ensure_open()?;
        if self.inner.lock().await.catalog.link(id).is_none() {
            return Err(unknown_link(id));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
