//! Presence Announcement ("chirp") and the channel schedule that sends it.
//!
//! An unconfigured Enrollee advertises SHA256("chirp" | DER) of its
//! bootstrap key. A provisioned one advertises a Reconfig Announcement
//! over the same schedule instead.

use std::time::Duration;

use dpp_core::attributes::{AttrId, Attributes};
use dpp_core::bootstrap::BootstrapInfo;
use dpp_core::constants::DEFAULT_CHANNELS;
use dpp_core::errors::CodecError;
use dpp_core::frame::{DppFrame, FrameType};
use tracing::debug;

pub fn build_presence_announcement(own: &BootstrapInfo) -> DppFrame {
    DppFrame::new(
        FrameType::PresenceAnnouncement,
        Attributes::new().with(AttrId::RBootstrapKeyHash, own.chirp_hash().to_vec()),
    )
}

/// Chirp hash carried by a Presence Announcement.
pub fn parse_presence_announcement(frame: &DppFrame) -> Result<[u8; 32], CodecError> {
    let hash = frame.attrs.require_len(AttrId::RBootstrapKeyHash, 32)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(hash);
    Ok(out)
}

/// Next thing the chirp loop does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChirpStep {
    /// Send the announcement on `freq`, then listen for `wait`.
    Send { freq: u32, wait: Duration },
    /// Round done; idle (or listen on `listen_freq`) for `wait`.
    RoundWait { wait: Duration, listen_freq: Option<u32> },
    /// All iterations used.
    Stopped,
}

/// Channel walk for one chirp run.
#[derive(Debug, Clone)]
pub struct ChirpSchedule {
    frame: DppFrame,
    freqs: Vec<u32>,
    next: usize,
    iterations_left: u32,
    channel_wait: Duration,
    round_wait: Duration,
    listen_freq: Option<u32>,
    round: u32,
}

impl ChirpSchedule {
    /// Channels are the bootstrap's own list followed by the defaults,
    /// without duplicates.
    pub fn new(
        frame: DppFrame,
        own_freqs: &[u32],
        iterations: u32,
        channel_wait: Duration,
        round_wait: Duration,
    ) -> Self {
        let mut freqs: Vec<u32> = Vec::new();
        for f in own_freqs.iter().chain(DEFAULT_CHANNELS.iter()) {
            if !freqs.contains(f) {
                freqs.push(*f);
            }
        }
        Self {
            frame,
            freqs,
            next: 0,
            iterations_left: iterations.max(1),
            channel_wait,
            round_wait,
            listen_freq: None,
            round: 0,
        }
    }

    /// Listen on `freq` during the wait between rounds.
    pub fn with_listen(mut self, freq: u32) -> Self {
        self.listen_freq = Some(freq);
        self
    }

    pub fn frame(&self) -> &DppFrame {
        &self.frame
    }

    pub fn freqs(&self) -> &[u32] {
        &self.freqs
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn step(&mut self) -> ChirpStep {
        if self.iterations_left == 0 {
            return ChirpStep::Stopped;
        }
        if self.next == 0 {
            self.round += 1;
            debug!(round = self.round, "chirp round start");
        }
        if let Some(&freq) = self.freqs.get(self.next) {
            self.next += 1;
            return ChirpStep::Send {
                freq,
                wait: self.channel_wait,
            };
        }
        self.next = 0;
        self.iterations_left -= 1;
        if self.iterations_left == 0 {
            return ChirpStep::Stopped;
        }
        // Undo the round bump: the next call starts the new round.
        self.round -= 1;
        ChirpStep::RoundWait {
            wait: self.round_wait,
            listen_freq: self.listen_freq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpp_core::bootstrap::{BootstrapManager, BootstrapParams, BootstrapType};

    fn own() -> BootstrapInfo {
        let mut mgr = BootstrapManager::new();
        let id = mgr
            .generate(BootstrapParams {
                kind: Some(BootstrapType::QrCode),
                ..Default::default()
            })
            .unwrap();
        mgr.get(id).unwrap().clone()
    }

    #[test]
    fn announcement_carries_chirp_hash() {
        let bi = own();
        let frame = build_presence_announcement(&bi);
        assert_eq!(frame.frame_type, FrameType::PresenceAnnouncement);
        assert_eq!(&parse_presence_announcement(&frame).unwrap(), bi.chirp_hash());
        assert_ne!(bi.chirp_hash(), bi.key_hash());
    }

    #[test]
    fn schedule_walks_channels_then_stops() {
        let bi = own();
        let wait = Duration::from_secs(2);
        let round = Duration::from_secs(30);
        let mut plan =
            ChirpSchedule::new(build_presence_announcement(&bi), &[2412, 2437], 2, wait, round);
        assert_eq!(plan.freqs(), &[2412, 2437, 5220, 5745]);

        let sent: Vec<u32> = (0..4)
            .map(|_| match plan.step() {
                ChirpStep::Send { freq, .. } => freq,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sent, vec![2412, 2437, 5220, 5745]);
        assert_eq!(
            plan.step(),
            ChirpStep::RoundWait {
                wait: round,
                listen_freq: None
            }
        );
        for _ in 0..4 {
            assert!(matches!(plan.step(), ChirpStep::Send { .. }));
        }
        assert_eq!(plan.round(), 2);
        assert_eq!(plan.step(), ChirpStep::Stopped);
        assert_eq!(plan.step(), ChirpStep::Stopped);
    }
}
