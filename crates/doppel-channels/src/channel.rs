use async_trait::async_trait;

use doppel_core::types::ChannelId;

use crate::{
    error::ChannelError,
    types::{ChannelStatus, ContactInfo, OutboundContent, SendResult},
};

/// Common interface implemented by every channel adapter (Telegram,
/// WhatsApp, …).
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// `ChannelManager` and driven from multiple Tokio tasks. All methods take
/// `&self`: adapters manage their connection state internally, which lets
/// the pipeline clone an `Arc<dyn Channel>` out of the manager and send
/// without holding any lock across the (potentially long) dispatch delay.
///
/// Inbound traffic does not flow through this trait: adapters push
/// [`ChannelEvent`](crate::types::ChannelEvent)s on the mpsc sender they
/// were constructed with.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Which transport this adapter speaks.
    fn id(&self) -> ChannelId;

    /// Human-readable name shown in the operator dashboard.
    fn display_name(&self) -> &str;

    /// Short icon identifier for the dashboard (e.g. `"telegram"`).
    fn icon(&self) -> &str;

    /// Current runtime status without blocking.
    fn status(&self) -> ChannelStatus;

    fn is_connected(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    /// Establish the connection to the external service.
    ///
    /// Implementations should transition to [`ChannelStatus::Connected`]
    /// on success. Reconnect policy after a later failure is
    /// adapter-internal; the pipeline only observes `status`.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&self) -> Result<(), ChannelError>;

    /// Deliver one message. Failures come back as a [`SendResult`] value —
    /// this method must not error for delivery problems.
    async fn send_message(&self, to: &str, content: &OutboundContent) -> SendResult;

    /// Show a typing indicator for roughly `duration_ms`. Best-effort;
    /// the return value is ignored by callers.
    async fn send_typing_indicator(&self, to: &str, duration_ms: u64);

    /// Directory of known contacts, where the transport exposes one.
    async fn get_contacts(&self) -> Result<Vec<ContactInfo>, ChannelError>;

    /// Look up a single contact.
    async fn get_contact(&self, contact_id: &str) -> Result<ContactInfo, ChannelError>;

    /// Canonicalize a platform-native id (strip `@`, zero-pad, …) so the
    /// same peer always maps to the same contact key.
    fn normalize_contact_id(&self, raw: &str) -> String;
}
