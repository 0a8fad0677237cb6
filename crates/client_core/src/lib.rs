pub mod api;
pub mod catalog;
pub mod controller;
pub mod defaults;
pub mod embed_probe;
pub mod error;
pub mod frame_loader;

pub use api::{CatalogApi, HttpCatalogApi};
pub use catalog::Catalog;
pub use controller::{
    Activation, CatalogController, CatalogEvent, CatalogSource, ConfirmPrompt, DeleteOutcome,
    NewLinkDraft,
};
pub use defaults::default_catalog;
pub use embed_probe::{attach_probe, EmbedProbe, HttpEmbedProbe, ProbeOutcome};
pub use error::SyncError;
pub use frame_loader::{
    AttemptId, BlockReason, FrameEvent, FrameLoader, FrameOverlay, FramePhase, FrameSnapshot,
    DEFAULT_EMBED_TIMEOUT,
};
