//! Chat media attachments.
//!
//! Sending an image/video/audio message is a two-step flow: upload the
//! blob to the media bucket, then insert a message row pointing at its
//! public URL. The insert propagates through the normal message feed, so
//! the receiving side needs no special handling for media.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use confide_shared::constants::CHAT_MEDIA_BUCKET;
use confide_shared::{Message, MessageKind, TransportError, UserId};
use confide_transport::{FileStorage, MessageStore};

/// Upload `bytes` and send the media message referencing it.
///
/// The storage path is namespaced by sender and salted with a fresh UUID,
/// so two uploads of the same file never collide.
pub async fn send_attachment(
    storage: &Arc<dyn FileStorage>,
    messages: &Arc<dyn MessageStore>,
    sender: UserId,
    receiver: UserId,
    kind: MessageKind,
    file_name: &str,
    bytes: Vec<u8>,
    content_type: &str,
    duration_secs: Option<u32>,
) -> Result<Message, TransportError> {
    let path = format!("{}/{}-{}", sender, Uuid::new_v4(), file_name);
    let size = bytes.len();

    storage
        .upload(CHAT_MEDIA_BUCKET, &path, bytes, content_type)
        .await?;
    let url = storage.public_url(CHAT_MEDIA_BUCKET, &path);

    info!(path = %path, size, ?kind, "Attachment uploaded");

    let message = Message::media(sender, receiver, kind, url, duration_secs);
    messages.insert(message.clone()).await?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use confide_shared::ConversationKey;
    use confide_transport::MemoryBackend;

    #[tokio::test]
    async fn upload_then_insert_row() {
        let backend = MemoryBackend::new();
        let storage = backend.file_storage();
        let messages = backend.message_store();
        let (alice, bob) = (UserId::new(), UserId::new());

        let sent = send_attachment(
            &storage,
            &messages,
            alice,
            bob,
            MessageKind::Audio,
            "note.ogg",
            vec![1, 2, 3, 4],
            "audio/ogg",
            Some(7),
        )
        .await
        .unwrap();

        assert_eq!(sent.kind, MessageKind::Audio);
        assert_eq!(sent.media_duration_secs, Some(7));
        let url = sent.media_url.clone().expect("media url set");
        assert!(url.contains(CHAT_MEDIA_BUCKET));
        assert!(url.ends_with("note.ogg"));

        // The blob is retrievable and the row reached the store.
        let path = url.split_once(&format!("{CHAT_MEDIA_BUCKET}/")).unwrap().1;
        assert_eq!(
            backend.object_info(CHAT_MEDIA_BUCKET, path),
            Some((4, "audio/ogg".to_string()))
        );
        let key = ConversationKey::new(alice, bob);
        let fetched = messages.fetch_conversation(&key, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, sent.id);
    }
}
