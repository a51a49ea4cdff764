/// Application name, used as the generic notification title fallback
pub const APP_NAME: &str = "Confide";

/// Messages fetched on conversation activation (most recent N)
pub const DEFAULT_FETCH_LIMIT: u32 = 50;

/// How long an in-app toast stays visible before auto-dismissing
pub const TOAST_DURATION_MS: u64 = 4_000;

/// Buffer size of change-feed subscription channels
pub const FEED_CHANNEL_CAPACITY: usize = 256;

/// Buffer size of broadcast signaling channels
pub const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// Visible window of community messages tracked for read counts
pub const RECEIPT_WINDOW: usize = 100;

/// Notification ids remembered for duplicate suppression
pub const NOTIFICATION_DEDUP_CAPACITY: usize = 512;

/// After this long without a new ping, a typing indicator is stale
pub const TYPING_TTL_MS: u64 = 3_000;

/// Shared presence channel joined by every online client
pub const PRESENCE_CHANNEL: &str = "presence:online";

/// Storage bucket for chat media attachments
pub const CHAT_MEDIA_BUCKET: &str = "chat-media";
