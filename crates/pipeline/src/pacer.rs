//! Real-time audio frame pacing
//!
//! Frames are sent so the client receives them at playback rate: the
//! k-th paced frame is due at `t0 + k * frame_duration`, where `t0` is
//! taken when the paced run starts. A late frame goes out immediately and
//! the schedule is not shifted, so stalls never compound into drift.

use tokio::time::{sleep_until, Instant};
use voice_agent_config::DeliveryConfig;
use voice_agent_core::{AudioFrame, FrameTiming, OutboundMessage, Transport};

use crate::{ConversationSession, PipelineError};

/// Outcome of one `deliver` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    /// Frames handed to the transport
    pub sent: usize,
    /// Delivery stopped because the abort flag was set
    pub aborted: bool,
}

/// Sends frame sequences over a transport at playback rate
#[derive(Debug, Clone)]
pub struct AudioFramePacer {
    timing: FrameTiming,
    pre_buffer_frames: usize,
}

impl AudioFramePacer {
    pub fn new(timing: FrameTiming, pre_buffer_frames: usize) -> Self {
        Self {
            timing,
            pre_buffer_frames,
        }
    }

    pub fn from_settings(config: &DeliveryConfig) -> Self {
        Self::new(
            FrameTiming::from_millis(config.frame_duration_ms),
            config.pre_buffer_frames,
        )
    }

    pub fn timing(&self) -> FrameTiming {
        self.timing
    }

    /// Deliver `frames` in order
    ///
    /// With `pre_buffer`, the first `pre_buffer_frames` frames are sent back
    /// to back with no abort check. The abort flag is checked before every
    /// paced frame. A send failure ends delivery and is returned as is.
    pub async fn deliver(
        &self,
        transport: &dyn Transport,
        frames: &[AudioFrame],
        pre_buffer: bool,
        session: &ConversationSession,
    ) -> Result<DeliveryReport, PipelineError> {
        let mut report = DeliveryReport::default();
        if frames.is_empty() {
            return Ok(report);
        }

        let burst = if pre_buffer {
            self.pre_buffer_frames.min(frames.len())
        } else {
            0
        };

        for frame in &frames[..burst] {
            self.send_frame(transport, frame, session).await?;
            report.sent += 1;
        }
        if burst > 0 {
            tracing::debug!(session_id = %session.id, frames = burst, "Pre-buffer burst sent");
        }

        let abort = session.abort_flag();
        let t0 = Instant::now();

        for (k, frame) in frames[burst..].iter().enumerate() {
            if abort.is_set() {
                report.aborted = true;
                break;
            }

            let target = t0 + self.timing.offset_of(k);
            if Instant::now() < target {
                sleep_until(target).await;
                if abort.is_set() {
                    report.aborted = true;
                    break;
                }
            }

            self.send_frame(transport, frame, session).await?;
            report.sent += 1;
        }

        if report.aborted {
            tracing::info!(
                session_id = %session.id,
                sent = report.sent,
                remaining = frames.len() - report.sent,
                "Delivery aborted"
            );
        }

        Ok(report)
    }

    async fn send_frame(
        &self,
        transport: &dyn Transport,
        frame: &AudioFrame,
        session: &ConversationSession,
    ) -> Result<(), PipelineError> {
        transport
            .send(OutboundMessage::Audio(frame.payload().clone()))
            .await?;
        session.activity().touch();
        metrics::counter!("voice_agent_frames_sent_total").increment(1);
        Ok(())
    }
}

impl Default for AudioFramePacer {
    fn default() -> Self {
        Self::new(FrameTiming::default(), 3)
    }
}
