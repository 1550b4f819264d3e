//! Channel-tree synchronization.

use async_trait::async_trait;
use tracing::info;

use reposync_model::channel::Channel;
use reposync_repo::traits::{ContentRepository, Watermark};

use crate::error::SyncResult;

/// One channel's worth of synchronization, provided by the engine run.
#[async_trait]
pub trait ChannelScope: Send {
    /// Synchronize every object type within one channel, starting from the
    /// channel's effective watermark.
    async fn sync_channel(&mut self, channel_id: i64, watermark_ts: i64) -> SyncResult<()>;
}

/// Walks the channel tree pre-order and drives one scoped synchronization
/// per channel.
///
/// Parents run before children because child channels may reference
/// parent-channel records; sibling order carries no meaning. Each channel
/// tracks its own watermark.
pub struct ChannelWalker<'a> {
    source: &'a dyn ContentRepository,
    target: &'a dyn ContentRepository,
    rule_text: Option<String>,
    new_watermark: i64,
    dry_run: bool,
}

impl<'a> ChannelWalker<'a> {
    /// Create a walker for one run.
    #[must_use]
    pub fn new(
        source: &'a dyn ContentRepository,
        target: &'a dyn ContentRepository,
        rule_text: Option<String>,
        new_watermark: i64,
        dry_run: bool,
    ) -> Self {
        Self {
            source,
            target,
            rule_text,
            new_watermark,
            dry_run,
        }
    }

    /// Walk the tree, synchronizing each channel through `scope`.
    pub async fn walk(&self, tree: &Channel, scope: &mut dyn ChannelScope) -> SyncResult<()> {
        for channel in tree.walk() {
            let stored = self.target.get_watermark(Some(channel.channel_id)).await?;
            let rule = self.rule_text.as_deref();
            let watermark_ts = match &stored {
                Some(watermark) => {
                    let effective = watermark.effective_timestamp(rule);
                    if effective == 0 && watermark.timestamp != 0 {
                        info!(
                            channel = channel.channel_id,
                            "Filter rule changed since last sync, full resync of channel"
                        );
                    }
                    effective
                }
                None => 0,
            };

            info!(
                channel = channel.channel_id,
                name = %channel.name,
                watermark = watermark_ts,
                "Synchronizing channel"
            );

            self.source
                .set_current_channel(Some(channel.channel_id))
                .await?;
            self.target
                .set_current_channel(Some(channel.channel_id))
                .await?;

            scope.sync_channel(channel.channel_id, watermark_ts).await?;

            if !self.dry_run {
                self.target
                    .set_watermark(
                        Some(channel.channel_id),
                        &Watermark::new(self.new_watermark, self.rule_text.clone()),
                    )
                    .await?;
            }
        }

        self.source.set_current_channel(None).await?;
        self.target.set_current_channel(None).await?;
        Ok(())
    }
}
