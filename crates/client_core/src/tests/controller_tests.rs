use std::time::Duration;

use super::*;
use crate::{
    api::{OP_CREATE_CATEGORY, OP_LOAD_CATALOG},
    frame_loader::{BlockReason, FramePhase, DEFAULT_EMBED_TIMEOUT},
};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Fetch,
    CreateCategory(NewCategory),
    UpdateCategory(CategoryId, CategoryPatch),
    DeleteCategory(CategoryId),
    CreateLink(NewLink),
    UpdateLink(LinkId, LinkPatch),
    DeleteLink(LinkId),
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Network,
    Rejected,
}

fn failure(kind: Failure, operation: &'static str) -> SyncError {
    match kind {
        Failure::Network => SyncError::NetworkFailure {
            operation,
            message: "connection refused".to_string(),
        },
        Failure::Rejected => SyncError::RemoteRejected {
            operation,
            status: 500,
            error: "Failed".to_string(),
            details: None,
        },
    }
}

struct ScriptedApi {
    catalog: Vec<Category>,
    fail_fetch: bool,
    fail_with: Mutex<Option<Failure>>,
    hold_creates: Mutex<Option<oneshot::Receiver<()>>>,
    hold_updates: Mutex<Option<oneshot::Receiver<()>>>,
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<u64>,
}

impl ScriptedApi {
    fn serving(catalog: Vec<Category>) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            fail_fetch: false,
            fail_with: Mutex::new(None),
            hold_creates: Mutex::new(None),
            hold_updates: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(100),
        })
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            catalog: Vec::new(),
            fail_fetch: true,
            fail_with: Mutex::new(Some(Failure::Network)),
            hold_creates: Mutex::new(None),
            hold_updates: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(100),
        })
    }

    async fn fail_mutations(&self, kind: Failure) {
        *self.fail_with.lock().await = Some(kind);
    }

    async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: Call, operation: &'static str) -> Result<(), SyncError> {
        self.calls.lock().await.push(call);
        self.outcome(operation).await
    }

    async fn outcome(&self, operation: &'static str) -> Result<(), SyncError> {
        match *self.fail_with.lock().await {
            Some(kind) => Err(failure(kind, operation)),
            None => Ok(()),
        }
    }

    async fn next_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock().await;
        *next += 1;
        format!("{prefix}{next}")
    }
}

#[async_trait]
impl CatalogApi for ScriptedApi {
    async fn fetch_catalog(&self) -> Result<Vec<Category>, SyncError> {
        self.calls.lock().await.push(Call::Fetch);
        if self.fail_fetch {
            return Err(failure(Failure::Network, OP_LOAD_CATALOG));
        }
        Ok(self.catalog.clone())
    }

    async fn create_category(&self, body: &NewCategory) -> Result<Category, SyncError> {
        self.record(Call::CreateCategory(body.clone()), OP_CREATE_CATEGORY)
            .await?;
        let hold = self.hold_creates.lock().await.take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        Ok(Category {
            id: CategoryId::new(self.next_id("c").await),
            name: body.name.clone(),
            expanded: body.expanded.unwrap_or(false),
            sort_order: body.sort_order.unwrap_or(0),
            links: Vec::new(),
        })
    }

    async fn update_category(
        &self,
        id: &CategoryId,
        patch: &CategoryPatch,
    ) -> Result<(), SyncError> {
        self.calls
            .lock()
            .await
            .push(Call::UpdateCategory(id.clone(), patch.clone()));
        let hold = self.hold_updates.lock().await.take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        self.outcome("update category").await
    }

    async fn delete_category(&self, id: &CategoryId) -> Result<(), SyncError> {
        self.record(Call::DeleteCategory(id.clone()), "delete category")
            .await
    }

    async fn create_link(&self, body: &NewLink) -> Result<Link, SyncError> {
        self.record(Call::CreateLink(body.clone()), "create link")
            .await?;
        Ok(Link {
            id: LinkId::new(self.next_id("l").await),
            category_id: body.category_id.clone(),
            name: body.name.clone(),
            url: body.url.clone(),
            open_mode: body.open_mode,
            iframe_compatible: body.iframe_compatible,
            sort_order: body.sort_order.unwrap_or(0),
        })
    }

    async fn update_link(&self, id: &LinkId, patch: &LinkPatch) -> Result<(), SyncError> {
        self.record(Call::UpdateLink(id.clone(), patch.clone()), "update link")
            .await
    }

    async fn delete_link(&self, id: &LinkId) -> Result<(), SyncError> {
        self.record(Call::DeleteLink(id.clone()), "delete link")
            .await
    }
}

struct Answer {
    accept: bool,
    prompts: Mutex<Vec<String>>,
}

impl Answer {
    fn yes() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn no() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ConfirmPrompt for Answer {
    async fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().await.push(prompt.to_string());
        self.accept
    }
}

fn link(category: &str, id: &str, url: &str, open_mode: OpenMode, iframe_compatible: bool) -> Link {
    Link {
        id: LinkId::from(id),
        category_id: CategoryId::from(category),
        name: id.to_uppercase(),
        url: url.to_string(),
        open_mode,
        iframe_compatible,
        sort_order: 0,
    }
}

fn fixture() -> Vec<Category> {
    vec![
        Category {
            id: CategoryId::from("1"),
            name: "Analytics".to_string(),
            expanded: true,
            sort_order: 0,
            links: vec![
                link("1", "1a", "https://x", OpenMode::App, true),
                link("1", "1b", "https://y", OpenMode::App, true),
            ],
        },
        Category {
            id: CategoryId::from("2"),
            name: "Internal Apps".to_string(),
            expanded: false,
            sort_order: 1,
            links: vec![
                link("2", "2a", "https://crm", OpenMode::Tab, true),
                link("2", "2b", "https://legacy", OpenMode::App, false),
            ],
        },
    ]
}

async fn loaded_controller(
    api: Arc<ScriptedApi>,
    confirm: Arc<Answer>,
) -> (Arc<CatalogController>, mpsc::UnboundedReceiver<FrameEvent>) {
    let (frame, frame_events) = FrameLoader::new(DEFAULT_EMBED_TIMEOUT);
    let controller = CatalogController::new(api, frame, confirm);
    controller.load_catalog().await.expect("load");
    (controller, frame_events)
}

fn drain(events: &mut broadcast::Receiver<CatalogEvent>) -> Vec<CatalogEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn has_alert(events: &[CatalogEvent]) -> bool {
    events
        .iter()
        .any(|event| matches!(event, CatalogEvent::Alert { .. }))
}

async fn link_state(controller: &CatalogController, id: &str) -> Link {
    controller
        .catalog()
        .await
        .link(&LinkId::from(id))
        .cloned()
        .expect("link present")
}

async fn category_state(controller: &CatalogController, id: &str) -> Option<Category> {
    controller
        .catalog()
        .await
        .category(&CategoryId::from(id))
        .cloned()
}

#[tokio::test]
async fn load_catalog_uses_the_server_copy() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api, Answer::yes()).await;

    assert!(controller.is_loaded().await);
    let catalog = controller.catalog().await;
    assert_eq!(catalog.categories().len(), 2);
    assert_eq!(catalog.categories()[0].name, "Analytics");
}

#[tokio::test]
async fn load_failure_falls_back_to_the_injected_catalog() {
    let fallback = vec![Category {
        id: CategoryId::from("only"),
        name: "Offline".to_string(),
        expanded: true,
        sort_order: 0,
        links: Vec::new(),
    }];
    let (frame, _frame_events) = FrameLoader::new(DEFAULT_EMBED_TIMEOUT);
    let controller = CatalogController::new_with_fallback(
        ScriptedApi::unreachable(),
        frame,
        Answer::yes(),
        fallback.clone(),
    );
    let mut events = controller.subscribe_events();

    let source = controller.load_catalog().await.expect("load");

    assert_eq!(source, CatalogSource::Fallback);
    assert_eq!(controller.catalog().await.categories(), fallback.as_slice());
    let events = drain(&mut events);
    assert!(!has_alert(&events));
    assert!(events.contains(&CatalogEvent::CatalogReplaced {
        source: CatalogSource::Fallback
    }));
}

#[tokio::test]
async fn default_fallback_is_never_empty() {
    let (frame, _frame_events) = FrameLoader::new(DEFAULT_EMBED_TIMEOUT);
    let controller = CatalogController::new(ScriptedApi::unreachable(), frame, Answer::yes());

    controller.load_catalog().await.expect("load");

    assert!(!controller.catalog().await.is_empty());
}

#[tokio::test]
async fn toggle_persists_the_new_expansion() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    let expanded = controller
        .toggle_category(&CategoryId::from("1"))
        .await
        .expect("toggle");

    assert!(!expanded);
    assert!(!category_state(&controller, "1").await.expect("category").expanded);
    assert!(api.calls().await.contains(&Call::UpdateCategory(
        CategoryId::from("1"),
        CategoryPatch::expanded(false)
    )));
}

#[tokio::test]
async fn toggle_failure_reverts_without_an_alert() {
    for kind in [Failure::Network, Failure::Rejected] {
        let api = ScriptedApi::serving(fixture());
        let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
        api.fail_mutations(kind).await;
        let mut events = controller.subscribe_events();

        let expanded = controller
            .toggle_category(&CategoryId::from("2"))
            .await
            .expect("toggle never surfaces remote failures");

        assert!(!expanded);
        assert!(!category_state(&controller, "2").await.expect("category").expanded);
        assert!(!has_alert(&drain(&mut events)));
    }
}

#[tokio::test]
async fn earlier_toggle_failure_does_not_undo_a_later_toggle() {
    let api = ScriptedApi::serving(fixture());
    let (release, hold) = oneshot::channel();
    *api.hold_updates.lock().await = Some(hold);
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.toggle_category(&CategoryId::from("1")).await })
    };
    while !api
        .calls()
        .await
        .iter()
        .any(|call| matches!(call, Call::UpdateCategory(..)))
    {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(!category_state(&controller, "1").await.expect("category").expanded);

    let second = controller
        .toggle_category(&CategoryId::from("1"))
        .await
        .expect("second toggle");
    assert!(second);

    api.fail_mutations(Failure::Network).await;
    release.send(()).expect("release");
    let first = first.await.expect("join").expect("toggle never surfaces remote failures");

    assert!(first);
    assert!(category_state(&controller, "1").await.expect("category").expanded);
    assert_eq!(
        api.calls().await,
        vec![
            Call::Fetch,
            Call::UpdateCategory(CategoryId::from("1"), CategoryPatch::expanded(false)),
            Call::UpdateCategory(CategoryId::from("1"), CategoryPatch::expanded(true)),
        ]
    );
}

#[tokio::test]
async fn toggle_of_unknown_category_is_skipped() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    let result = controller.toggle_category(&CategoryId::from("nope")).await;

    assert!(matches!(result, Err(SyncError::ValidationSkipped(_))));
    assert_eq!(api.calls().await, vec![Call::Fetch]);
}

#[tokio::test]
async fn create_category_waits_for_the_server_id() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    let created = controller
        .create_category("  Reporting  ")
        .await
        .expect("create");

    assert_eq!(created.name, "Reporting");
    assert!(created.links.is_empty());
    let stored = category_state(&controller, created.id.as_str())
        .await
        .expect("stored under server id");
    assert!(stored.expanded);
    assert_eq!(
        api.calls().await.last(),
        Some(&Call::CreateCategory(NewCategory {
            name: "Reporting".to_string(),
            expanded: Some(true),
            sort_order: None,
        }))
    );
}

#[tokio::test]
async fn create_category_failure_alerts_and_adds_nothing() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    api.fail_mutations(Failure::Rejected).await;
    let mut events = controller.subscribe_events();
    let before = controller.catalog().await;

    let result = controller.create_category("Reporting").await;

    assert!(matches!(result, Err(SyncError::RemoteRejected { .. })));
    assert_eq!(controller.catalog().await, before);
    assert!(has_alert(&drain(&mut events)));
}

#[tokio::test]
async fn blank_names_never_reach_the_server() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    let before = controller.catalog().await;
    let category = CategoryId::from("1");

    let results = [
        controller.create_category("   ").await.map(|_| ()),
        controller
            .create_link(&category, NewLinkDraft::new("", "https://z"))
            .await
            .map(|_| ()),
        controller
            .create_link(&category, NewLinkDraft::new("Z", "  "))
            .await
            .map(|_| ()),
        controller.rename_category(&category, "").await,
    ];

    for result in results {
        assert!(matches!(result, Err(SyncError::ValidationSkipped(_))));
    }
    assert_eq!(api.calls().await, vec![Call::Fetch]);
    assert_eq!(controller.catalog().await, before);
}

#[tokio::test]
async fn create_link_appends_the_server_entity() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    let mut draft = NewLinkDraft::new(" Wiki ", " https://wiki ");
    draft.open_mode = OpenMode::Tab;
    let created = controller
        .create_link(&CategoryId::from("2"), draft)
        .await
        .expect("create");

    assert_eq!(created.name, "Wiki");
    assert_eq!(created.url, "https://wiki");
    let category = category_state(&controller, "2").await.expect("category");
    assert_eq!(category.links.last().map(|link| &link.id), Some(&created.id));
}

#[tokio::test]
async fn create_link_failure_adds_nothing() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    api.fail_mutations(Failure::Network).await;

    let result = controller
        .create_link(&CategoryId::from("1"), NewLinkDraft::new("Z", "https://z"))
        .await;

    assert!(matches!(result, Err(SyncError::NetworkFailure { .. })));
    let category = category_state(&controller, "1").await.expect("category");
    assert_eq!(category.links.len(), 2);
}

#[tokio::test]
async fn rename_applies_only_after_confirmation_from_the_server() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    let id = CategoryId::from("1");

    api.fail_mutations(Failure::Rejected).await;
    let mut events = controller.subscribe_events();
    assert!(controller.rename_category(&id, "Metrics").await.is_err());
    assert_eq!(category_state(&controller, "1").await.expect("c").name, "Analytics");
    assert!(has_alert(&drain(&mut events)));

    *api.fail_with.lock().await = None;
    controller.rename_category(&id, "Metrics").await.expect("rename");
    assert_eq!(category_state(&controller, "1").await.expect("c").name, "Metrics");
}

#[tokio::test]
async fn update_link_applies_the_confirmed_fields() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    let id = LinkId::from("2b");

    assert!(matches!(
        controller.update_link(&id, LinkPatch::default()).await,
        Err(SyncError::ValidationSkipped(_))
    ));

    controller
        .update_link(
            &id,
            LinkPatch {
                name: Some("Legacy".to_string()),
                iframe_compatible: Some(true),
                ..LinkPatch::default()
            },
        )
        .await
        .expect("update");

    let updated = link_state(&controller, "2b").await;
    assert_eq!(updated.name, "Legacy");
    assert!(updated.iframe_compatible);
    assert_eq!(updated.url, "https://legacy");
}

#[tokio::test]
async fn update_link_failure_leaves_the_link_unchanged() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    api.fail_mutations(Failure::Network).await;

    let result = controller
        .update_link(&LinkId::from("2b"), LinkPatch::iframe_compatible(true))
        .await;

    assert!(result.is_err());
    assert!(!link_state(&controller, "2b").await.iframe_compatible);
}

#[tokio::test]
async fn moves_reorder_after_the_server_accepts() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    controller
        .move_category(&CategoryId::from("1"), 5)
        .await
        .expect("move category");
    controller
        .move_link(&LinkId::from("1a"), 3)
        .await
        .expect("move link");

    let catalog = controller.catalog().await;
    assert_eq!(catalog.categories()[1].id, CategoryId::from("1"));
    let order: Vec<_> = catalog.categories()[1]
        .links
        .iter()
        .map(|link| link.id.as_str())
        .collect();
    assert_eq!(order, ["1b", "1a"]);
}

#[tokio::test]
async fn delete_category_requires_confirmation() {
    let api = ScriptedApi::serving(fixture());
    let confirm = Answer::no();
    let (controller, _frame_events) = loaded_controller(api.clone(), confirm.clone()).await;

    let outcome = controller
        .delete_category(&CategoryId::from("1"))
        .await
        .expect("delete");

    assert_eq!(outcome, DeleteOutcome::Cancelled);
    assert_eq!(
        confirm.prompts.lock().await.as_slice(),
        [CONFIRM_DELETE_CATEGORY.to_string()]
    );
    assert_eq!(api.calls().await, vec![Call::Fetch]);
    assert!(category_state(&controller, "1").await.is_some());
}

#[tokio::test]
async fn delete_category_failure_keeps_category_and_links() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    api.fail_mutations(Failure::Rejected).await;
    let mut events = controller.subscribe_events();

    let result = controller.delete_category(&CategoryId::from("1")).await;

    assert!(matches!(result, Err(SyncError::RemoteRejected { .. })));
    assert!(category_state(&controller, "1").await.is_some());
    assert_eq!(link_state(&controller, "1a").await.url, "https://x");
    assert!(has_alert(&drain(&mut events)));
}

#[tokio::test]
async fn delete_category_removes_it_and_its_links_after_the_server_confirms() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    let outcome = controller
        .delete_category(&CategoryId::from("1"))
        .await
        .expect("delete");

    assert_eq!(outcome, DeleteOutcome::Deleted);
    let catalog = controller.catalog().await;
    assert!(catalog.category(&CategoryId::from("1")).is_none());
    assert!(catalog.link(&LinkId::from("1a")).is_none());
    assert!(catalog.link(&LinkId::from("1b")).is_none());
}

#[tokio::test]
async fn delete_link_follows_the_same_policy() {
    let api = ScriptedApi::serving(fixture());
    let confirm = Answer::yes();
    let (controller, _frame_events) = loaded_controller(api.clone(), confirm.clone()).await;
    let id = LinkId::from("2a");

    api.fail_mutations(Failure::Network).await;
    assert!(controller.delete_link(&id).await.is_err());
    assert!(controller.catalog().await.link(&id).is_some());

    *api.fail_with.lock().await = None;
    assert_eq!(
        controller.delete_link(&id).await.expect("delete"),
        DeleteOutcome::Deleted
    );
    assert!(controller.catalog().await.link(&id).is_none());
    assert_eq!(
        confirm.prompts.lock().await.last().map(String::as_str),
        Some(CONFIRM_DELETE_LINK)
    );
}

#[tokio::test]
async fn tab_links_open_externally_even_when_embeddable() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api, Answer::yes()).await;
    let mut events = controller.subscribe_events();

    let activation = controller
        .activate_link(&LinkId::from("2a"))
        .await
        .expect("activate");

    assert_eq!(
        activation,
        Activation::External {
            url: "https://crm".to_string()
        }
    );
    assert_eq!(controller.frame().phase(), FramePhase::Idle);
    assert!(controller.active_link().await.is_none());
    assert!(drain(&mut events).contains(&CatalogEvent::OpenExternal {
        url: "https://crm".to_string()
    }));
}

#[tokio::test]
async fn incompatible_app_links_open_externally() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api, Answer::yes()).await;

    let activation = controller
        .activate_link(&LinkId::from("2b"))
        .await
        .expect("activate");

    assert!(matches!(activation, Activation::External { .. }));
    assert_eq!(controller.frame().phase(), FramePhase::Idle);
}

#[tokio::test]
async fn embeddable_links_engage_the_frame_and_become_active() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api, Answer::yes()).await;

    let activation = controller
        .activate_link(&LinkId::from("1a"))
        .await
        .expect("activate");

    let Activation::Embedded { attempt } = activation else {
        panic!("expected embedded activation, got {activation:?}");
    };
    assert_eq!(controller.frame().current_attempt(), Some(attempt));
    assert_eq!(controller.frame().phase(), FramePhase::Loading);
    assert_eq!(controller.active_link().await, Some(LinkId::from("1a")));
}

#[tokio::test]
async fn blocked_signal_downgrades_immediately_even_if_persisting_fails() {
    let api = ScriptedApi::serving(fixture());
    let (controller, mut frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    api.fail_mutations(Failure::Network).await;
    let mut events = controller.subscribe_events();

    let Activation::Embedded { attempt } = controller
        .activate_link(&LinkId::from("1a"))
        .await
        .expect("activate")
    else {
        panic!("expected embedded activation");
    };
    assert!(controller.frame().signal_error(attempt));
    let event = frame_events.recv().await.expect("frame event");
    controller.handle_frame_event(event).await;

    assert!(!link_state(&controller, "1a").await.iframe_compatible);
    controller.settle().await;
    assert!(!link_state(&controller, "1a").await.iframe_compatible);

    let downgrades: Vec<_> = api
        .calls()
        .await
        .into_iter()
        .filter(|call| matches!(call, Call::UpdateLink(..)))
        .collect();
    assert_eq!(
        downgrades,
        vec![Call::UpdateLink(
            LinkId::from("1a"),
            LinkPatch::iframe_compatible(false)
        )]
    );
    assert!(!has_alert(&drain(&mut events)));
}

#[tokio::test(start_paused = true)]
async fn timed_out_link_is_downgraded_after_another_link_was_activated() {
    let api = ScriptedApi::serving(fixture());
    let (controller, mut frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    controller
        .activate_link(&LinkId::from("1a"))
        .await
        .expect("activate");
    let timed_out = frame_events.recv().await.expect("timeout event");
    assert!(matches!(
        timed_out,
        FrameEvent::Blocked {
            reason: BlockReason::TimedOut,
            ..
        }
    ));
    controller
        .activate_link(&LinkId::from("1b"))
        .await
        .expect("activate");

    controller.handle_frame_event(timed_out).await;
    controller.settle().await;

    assert!(!link_state(&controller, "1a").await.iframe_compatible);
    assert!(link_state(&controller, "1b").await.iframe_compatible);
    assert_eq!(controller.active_link().await, Some(LinkId::from("1b")));
    assert!(api.calls().await.contains(&Call::UpdateLink(
        LinkId::from("1a"),
        LinkPatch::iframe_compatible(false)
    )));
}

#[tokio::test]
async fn blocked_signal_for_an_attempt_started_elsewhere_is_ignored() {
    let api = ScriptedApi::serving(fixture());
    let (controller, mut frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    let attempt = controller.frame().navigate("https://x", "Direct");
    assert!(controller.frame().signal_error(attempt));
    let event = frame_events.recv().await.expect("frame event");
    controller.handle_frame_event(event).await;
    controller.settle().await;

    assert!(link_state(&controller, "1a").await.iframe_compatible);
    assert_eq!(api.calls().await, vec![Call::Fetch]);
}

#[tokio::test(start_paused = true)]
async fn silent_frame_times_out_and_downgrades_the_active_link_once() {
    let api = ScriptedApi::serving(vec![Category {
        id: CategoryId::from("1"),
        name: "Analytics".to_string(),
        expanded: true,
        sort_order: 0,
        links: vec![link("1", "1a", "https://x", OpenMode::App, true)],
    }]);
    let (controller, frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    let mut events = controller.subscribe_events();
    let task = controller.spawn_frame_event_task(frame_events);
    let started = tokio::time::Instant::now();

    controller
        .activate_link(&LinkId::from("1a"))
        .await
        .expect("activate");

    loop {
        match events.recv().await.expect("controller event") {
            CatalogEvent::EmbedBlocked { link_id } => {
                assert_eq!(link_id, LinkId::from("1a"));
                break;
            }
            _ => continue,
        }
    }
    assert!(started.elapsed() >= DEFAULT_EMBED_TIMEOUT);
    assert!(!link_state(&controller, "1a").await.iframe_compatible);

    tokio::time::sleep(DEFAULT_EMBED_TIMEOUT * 2).await;
    controller.settle().await;
    let downgrades = api
        .calls()
        .await
        .into_iter()
        .filter(|call| matches!(call, Call::UpdateLink(..)))
        .count();
    assert_eq!(downgrades, 1);
    assert!(!drain(&mut events)
        .iter()
        .any(|event| matches!(event, CatalogEvent::EmbedBlocked { .. })));

    assert!(matches!(
        controller.activate_link(&LinkId::from("1a")).await,
        Ok(Activation::External { .. })
    ));
    task.abort();
}

#[tokio::test]
async fn deleting_the_active_link_tears_the_frame_down() {
    let api = ScriptedApi::serving(fixture());
    let (controller, _frame_events) = loaded_controller(api, Answer::yes()).await;

    controller
        .activate_link(&LinkId::from("1b"))
        .await
        .expect("activate");
    controller
        .delete_link(&LinkId::from("1b"))
        .await
        .expect("delete");

    assert!(controller.active_link().await.is_none());
    assert_eq!(controller.frame().phase(), FramePhase::Idle);
}

#[tokio::test]
async fn requests_resolving_after_teardown_leave_state_alone() {
    let api = ScriptedApi::serving(fixture());
    let (release, hold) = oneshot::channel();
    *api.hold_creates.lock().await = Some(hold);
    let (controller, _frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    let before = controller.catalog().await;

    let pending = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.create_category("Late").await })
    };
    while !api
        .calls()
        .await
        .iter()
        .any(|call| matches!(call, Call::CreateCategory(_)))
    {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    controller.teardown();
    release.send(()).expect("release");

    let result = pending.await.expect("join");
    assert_eq!(result, Err(SyncError::ViewClosed));
    assert_eq!(controller.catalog().await, before);
    assert!(matches!(
        controller.activate_link(&LinkId::from("1a")).await,
        Err(SyncError::ViewClosed)
    ));
}

#[tokio::test]
async fn successful_load_keeps_the_link_embeddable() {
    let api = ScriptedApi::serving(fixture());
    let (controller, mut frame_events) = loaded_controller(api.clone(), Answer::yes()).await;
    let mut events = controller.subscribe_events();

    let Activation::Embedded { attempt } = controller
        .activate_link(&LinkId::from("1a"))
        .await
        .expect("activate")
    else {
        panic!("expected embedded activation");
    };
    assert!(controller.frame().signal_loaded(attempt));
    let event = frame_events.recv().await.expect("frame event");
    controller.handle_frame_event(event).await;
    controller.settle().await;

    assert!(link_state(&controller, "1a").await.iframe_compatible);
    assert!(drain(&mut events).contains(&CatalogEvent::EmbedLoaded {
        link_id: LinkId::from("1a")
    }));
    assert_eq!(api.calls().await, vec![Call::Fetch]);
}

#[tokio::test]
async fn finished_downgrades_are_reaped_without_settling() {
    let api = ScriptedApi::serving(fixture());
    let (controller, mut frame_events) = loaded_controller(api.clone(), Answer::yes()).await;

    for (id, persisted) in [("1a", 1), ("1b", 2)] {
        let Activation::Embedded { attempt } = controller
            .activate_link(&LinkId::from(id))
            .await
            .expect("activate")
        else {
            panic!("expected embedded activation");
        };
        assert!(controller.frame().signal_error(attempt));
        let event = frame_events.recv().await.expect("frame event");
        controller.handle_frame_event(event).await;

        while api
            .calls()
            .await
            .iter()
            .filter(|call| matches!(call, Call::UpdateLink(..)))
            .count()
            < persisted
        {
            tokio::task::yield_now().await;
        }
    }

    assert_eq!(controller.background_tasks().await, 1);
    assert!(!link_state(&controller, "1a").await.iframe_compatible);
    assert!(!link_state(&controller, "1b").await.iframe_compatible);
}
