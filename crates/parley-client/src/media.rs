//! Voice/video call controls.
//!
//! Microphone and speaker state is one explicit [`VoiceState`]; the camera is
//! an independent flag.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    #[default]
    Normal,
    Muted,
    /// Muted and not hearing anyone.
    Deafened,
}

impl VoiceState {
    /// Unmuting while deafened also undeafens.
    pub fn toggle_mute(self) -> Self {
        match self {
            VoiceState::Normal => VoiceState::Muted,
            VoiceState::Muted | VoiceState::Deafened => VoiceState::Normal,
        }
    }

    /// Undeafening leaves the microphone muted.
    pub fn toggle_deafen(self) -> Self {
        match self {
            VoiceState::Normal | VoiceState::Muted => VoiceState::Deafened,
            VoiceState::Deafened => VoiceState::Muted,
        }
    }

    pub fn is_muted(self) -> bool {
        self != VoiceState::Normal
    }

    pub fn is_deafened(self) -> bool {
        self == VoiceState::Deafened
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallState {
    pub room: Option<String>,
    pub voice: VoiceState,
    pub video_enabled: bool,
}

impl Default for CallState {
    fn default() -> Self {
        Self {
            room: None,
            voice: VoiceState::Normal,
            video_enabled: true,
        }
    }
}

impl CallState {
    pub fn in_call(&self) -> bool {
        self.room.is_some()
    }

    pub fn start_call(&mut self, room: impl Into<String>) -> Result<&Self> {
        if self.in_call() {
            return Err(ClientError::AlreadyInCall);
        }
        *self = Self {
            room: Some(room.into()),
            ..Self::default()
        };
        info!(room = ?self.room, "Call started");
        Ok(self)
    }

    pub fn end_call(&mut self) -> Result<&Self> {
        if !self.in_call() {
            return Err(ClientError::NotInCall);
        }
        *self = Self::default();
        info!("Call ended");
        Ok(self)
    }

    pub fn toggle_mute(&mut self) -> Result<VoiceState> {
        self.require_call()?;
        self.voice = self.voice.toggle_mute();
        info!(voice = ?self.voice, "Mute toggled");
        Ok(self.voice)
    }

    pub fn toggle_deafen(&mut self) -> Result<VoiceState> {
        self.require_call()?;
        self.voice = self.voice.toggle_deafen();
        info!(voice = ?self.voice, "Deafen toggled");
        Ok(self.voice)
    }

    pub fn toggle_video(&mut self) -> Result<bool> {
        self.require_call()?;
        self.video_enabled = !self.video_enabled;
        info!(video = self.video_enabled, "Video toggled");
        Ok(self.video_enabled)
    }

    fn require_call(&self) -> Result<()> {
        if self.in_call() {
            Ok(())
        } else {
            Err(ClientError::NotInCall)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_transitions() {
        assert_eq!(VoiceState::Normal.toggle_mute(), VoiceState::Muted);
        assert_eq!(VoiceState::Muted.toggle_mute(), VoiceState::Normal);
        assert_eq!(VoiceState::Deafened.toggle_mute(), VoiceState::Normal);
    }

    #[test]
    fn deafen_transitions() {
        assert_eq!(VoiceState::Normal.toggle_deafen(), VoiceState::Deafened);
        assert_eq!(VoiceState::Muted.toggle_deafen(), VoiceState::Deafened);
        assert_eq!(VoiceState::Deafened.toggle_deafen(), VoiceState::Muted);
        assert!(VoiceState::Deafened.is_muted());
    }

    #[test]
    fn video_is_independent_of_voice() {
        let mut call = CallState::default();
        call.start_call("room-1").unwrap();
        call.toggle_deafen().unwrap();
        assert!(!call.toggle_video().unwrap());
        assert_eq!(call.voice, VoiceState::Deafened);
        assert_eq!(call.toggle_mute().unwrap(), VoiceState::Normal);
        assert!(!call.video_enabled);
    }

    #[test]
    fn toggles_require_a_call() {
        let mut call = CallState::default();
        assert!(matches!(call.toggle_mute(), Err(ClientError::NotInCall)));
        call.start_call("room-1").unwrap();
        assert!(matches!(call.start_call("room-2"), Err(ClientError::AlreadyInCall)));
        call.toggle_mute().unwrap();
        call.end_call().unwrap();
        assert_eq!(call, CallState::default());
        assert!(matches!(call.end_call(), Err(ClientError::NotInCall)));
    }
}
