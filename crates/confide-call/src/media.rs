use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use confide_shared::CallKind;

#[derive(Error, Debug)]
pub enum MediaError {
    /// The user or platform denied device access. Non-retryable: surface
    /// it, never retry automatically.
    #[error("Media access denied by the user or platform")]
    PermissionDenied,

    #[error("No capture device available")]
    NoDevice,

    #[error("Media device error: {0}")]
    Device(String),
}

/// Source of local capture media. The concrete implementation belongs to
/// the host platform; the call engine only needs acquisition to be
/// fallible and the resulting tracks to be toggleable.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, kind: CallKind) -> Result<LocalMedia, MediaError>;
}

/// Handle to the local capture stream of one call.
///
/// Exclusively owned by the active call; clones share the same underlying
/// track flags. Toggles are synchronous flips of the track `enabled`
/// flags and never renegotiate the connection.
#[derive(Clone)]
pub struct LocalMedia {
    kind: CallKind,
    audio_enabled: Arc<AtomicBool>,
    video_enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl LocalMedia {
    pub fn new(kind: CallKind) -> Self {
        Self {
            kind,
            audio_enabled: Arc::new(AtomicBool::new(true)),
            video_enabled: Arc::new(AtomicBool::new(kind == CallKind::Video)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// Flip the audio track. Returns whether the microphone is now muted.
    pub fn toggle_mute(&self) -> bool {
        if self.is_stopped() {
            return self.is_muted();
        }
        let was_enabled = self.audio_enabled.fetch_xor(true, Ordering::SeqCst);
        debug!(muted = was_enabled, "Mute toggled");
        was_enabled
    }

    /// Flip the video track. Returns whether video is now enabled.
    /// Always `false` on audio-only calls, which have no video track.
    pub fn toggle_video(&self) -> bool {
        if self.kind != CallKind::Video || self.is_stopped() {
            return false;
        }
        let was_enabled = self.video_enabled.fetch_xor(true, Ordering::SeqCst);
        debug!(video = !was_enabled, "Video toggled");
        !was_enabled
    }

    pub fn is_muted(&self) -> bool {
        !self.audio_enabled.load(Ordering::SeqCst)
    }

    pub fn is_video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    /// Stop all tracks. Returns `true` only on the first stop, so callers
    /// never stop already-stopped tracks twice.
    pub fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        if first {
            self.audio_enabled.store(false, Ordering::SeqCst);
            self.video_enabled.store(false, Ordering::SeqCst);
            info!("Local media tracks stopped");
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Media source with no real devices: grants every acquisition with
/// flag-only tracks. Used by tests and headless simulations.
pub struct NullMediaSource;

#[async_trait]
impl MediaSource for NullMediaSource {
    async fn acquire(&self, kind: CallKind) -> Result<LocalMedia, MediaError> {
        Ok(LocalMedia::new(kind))
    }
}

/// Media source that always reports a permission denial.
pub struct DeniedMediaSource;

#[async_trait]
impl MediaSource for DeniedMediaSource {
    async fn acquire(&self, _kind: CallKind) -> Result<LocalMedia, MediaError> {
        Err(MediaError::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_mute_roundtrip() {
        let media = LocalMedia::new(CallKind::Audio);
        assert!(!media.is_muted());

        assert!(media.toggle_mute());
        assert!(media.is_muted());

        assert!(!media.toggle_mute());
        assert!(!media.is_muted());
    }

    #[test]
    fn test_video_toggle_only_on_video_calls() {
        let audio = LocalMedia::new(CallKind::Audio);
        assert!(!audio.is_video_enabled());
        assert!(!audio.toggle_video());

        let video = LocalMedia::new(CallKind::Video);
        assert!(video.is_video_enabled());
        assert!(!video.toggle_video());
        assert!(!video.is_video_enabled());
        assert!(video.toggle_video());
    }

    #[test]
    fn test_stop_is_once() {
        let media = LocalMedia::new(CallKind::Video);
        assert!(media.stop());
        assert!(!media.stop());
        assert!(media.is_stopped());

        // Toggles after stop are inert.
        assert!(media.toggle_mute());
        assert!(!media.toggle_video());
    }
}
