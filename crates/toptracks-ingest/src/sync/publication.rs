//! Shadow collection lifecycle
//!
//! ```text
//! Idle ──prepare──► ShadowPrepared ──mark_populated──► Populated ──swap──► Swapped ──finish──► Idle
//! ```
//!
//! Writers only touch shadow collections; the live ones stay readable until
//! the swap renames the shadows over them.

use std::fmt;
use toptracks_common::types::FeedKind;
use tracing::{error, info};

use crate::error::{IngestError, IngestResult};
use crate::store::{CollectionKind, DocumentStore};
use crate::telemetry::ErrorReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationState {
    Idle,
    ShadowPrepared,
    Populated,
    Swapped,
}

impl fmt::Display for PublicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublicationState::Idle => "idle",
            PublicationState::ShadowPrepared => "shadow-prepared",
            PublicationState::Populated => "populated",
            PublicationState::Swapped => "swapped",
        };
        f.write_str(name)
    }
}

/// Collections that must not exist when a cycle starts preparing
fn leftover_names() -> Vec<&'static str> {
    CollectionKind::ALL
        .iter()
        .flat_map(|kind| [kind.shadow(), kind.old()])
        .collect()
}

/// One publication of one feed kind
pub struct Publication<'a> {
    store: &'a dyn DocumentStore,
    reporter: &'a dyn ErrorReporter,
    feed_kind: FeedKind,
    state: PublicationState,
}

impl<'a> Publication<'a> {
    pub fn new(store: &'a dyn DocumentStore, reporter: &'a dyn ErrorReporter, feed_kind: FeedKind) -> Self {
        Self {
            store,
            reporter,
            feed_kind,
            state: PublicationState::Idle,
        }
    }

    pub fn state(&self) -> PublicationState {
        self.state
    }

    /// Name writers must use for `kind` while this publication is open
    pub fn shadow(&self, kind: CollectionKind) -> &'static str {
        kind.shadow()
    }

    fn expect_state(&self, expected: PublicationState, step: &str) -> IngestResult<()> {
        if self.state != expected {
            return Err(IngestError::Publication(format!(
                "{} requires state {}, found {}",
                step, expected, self.state
            )));
        }
        Ok(())
    }

    /// Drop leftovers of an interrupted cycle and create fresh shadows
    ///
    /// Incremental feeds seed each shadow with a copy of the live collection;
    /// full feeds start from empty shadows.
    pub async fn prepare(&mut self) -> IngestResult<()> {
        self.expect_state(PublicationState::Idle, "prepare")?;

        let leftovers = leftover_names();
        for name in &leftovers {
            self.store.drop_collection(name).await?;
        }

        let existing = self.store.list_collections().await?;
        let survivors: Vec<String> = existing
            .iter()
            .filter(|name| leftovers.contains(&name.as_str()))
            .cloned()
            .collect();
        if !survivors.is_empty() {
            error!(collections = ?survivors, "Stale collections survived cleanup");
            return Err(IngestError::ShadowState(survivors));
        }

        for kind in CollectionKind::ALL {
            let shadow = kind.shadow();
            self.store.create_collection(shadow, kind).await?;

            let live_exists = existing.iter().any(|name| name == kind.live());
            if self.feed_kind == FeedKind::Incremental && live_exists {
                let copied = self.store.copy_collection(kind.live(), shadow).await?;
                info!(collection = %shadow, copied, "Seeded shadow from live collection");
            }

            self.store.ensure_indexes(shadow, kind).await?;
        }

        info!(feed = %self.feed_kind, "Shadow collections prepared");
        self.state = PublicationState::ShadowPrepared;
        Ok(())
    }

    pub fn mark_populated(&mut self) -> IngestResult<()> {
        self.expect_state(PublicationState::ShadowPrepared, "mark_populated")?;
        self.state = PublicationState::Populated;
        Ok(())
    }

    /// Publish both shadows under their live names
    ///
    /// A failure here is alarmed and never retried.
    pub async fn swap(&mut self) -> IngestResult<()> {
        self.expect_state(PublicationState::Populated, "swap")?;

        for kind in CollectionKind::ALL {
            if let Err(source) = self
                .store
                .swap_collections(kind.live(), kind.shadow(), kind.old())
                .await
            {
                error!(
                    alarm = true,
                    feed = %self.feed_kind,
                    collection = %kind.live(),
                    error = %source,
                    "Collection swap failed, live collection may be unbound"
                );
                self.reporter
                    .report(&format!("swap {}", kind.live()), &source);
                return Err(IngestError::Swap {
                    collection: kind.live().to_string(),
                    source,
                });
            }
        }

        info!(feed = %self.feed_kind, "Published shadow collections");
        self.state = PublicationState::Swapped;
        Ok(())
    }

    /// Close a swapped publication
    pub fn finish(&mut self) -> IngestResult<()> {
        self.expect_state(PublicationState::Swapped, "finish")?;
        self.state = PublicationState::Idle;
        Ok(())
    }
}
