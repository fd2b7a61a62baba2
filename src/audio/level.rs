//! Speaking indicator for the remote agent's audio
//!
//! Observational only: nothing in the session reacts to the level.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::backend::AudioFrame;
use super::codec::normalized_rms;

#[derive(Debug, Clone)]
pub struct LevelConfig {
    /// Weight of the previous level in the exponential smoothing
    pub smoothing: f32,
    /// Amplification applied after smoothing
    pub gain: f32,
    /// Level above which the agent counts as speaking
    pub speaking_threshold: f32,
    /// Number of most recent samples the RMS is taken over
    pub window: usize,
    pub tick: Duration,
    /// Window is cleared when no audio arrived for this long
    pub stale_after: Duration,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.8,
            gain: 3.0,
            speaking_threshold: 0.06,
            window: 2048,
            tick: Duration::from_millis(16),
            stale_after: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioLevel {
    /// Smoothed, amplified level in [0, 1]
    pub level: f32,
    pub speaking: bool,
}

#[derive(Debug, Clone)]
pub struct AudioLevelMonitor {
    config: LevelConfig,
    smoothed: f32,
}

impl AudioLevelMonitor {
    pub fn new(config: LevelConfig) -> Self {
        Self {
            config,
            smoothed: 0.0,
        }
    }

    /// Fold one buffer into the smoothed level
    pub fn tick(&mut self, samples: &[i16]) -> AudioLevel {
        let rms = normalized_rms(samples);
        let s = self.config.smoothing;
        self.smoothed = s * self.smoothed + (1.0 - s) * rms;

        let level = (self.smoothed * self.config.gain).clamp(0.0, 1.0);
        AudioLevel {
            level,
            speaking: level > self.config.speaking_threshold,
        }
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
    }

    /// Run the monitor over remote frames until the frame source closes,
    /// publishing every tick on `levels`
    pub fn spawn(
        mut self,
        mut frames: broadcast::Receiver<AudioFrame>,
        levels: watch::Sender<AudioLevel>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut window: VecDeque<i16> = VecDeque::with_capacity(self.config.window);
            let mut last_frame = Instant::now();
            let mut interval = tokio::time::interval(self.config.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    frame = frames.recv() => match frame {
                        Ok(frame) => {
                            last_frame = Instant::now();
                            window.extend(frame.samples);
                            let excess = window.len().saturating_sub(self.config.window);
                            window.drain(..excess);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Level monitor skipped {} frames", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = interval.tick() => {
                        if last_frame.elapsed() > self.config.stale_after {
                            window.clear();
                        }
                        let level = self.tick(window.make_contiguous());
                        if levels.send(level).is_err() {
                            break;
                        }
                    }
                }
            }

            let _ = levels.send(AudioLevel::default());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_not_speaking() {
        let mut monitor = AudioLevelMonitor::new(LevelConfig::default());
        let level = monitor.tick(&[0; 2048]);
        assert_eq!(level.level, 0.0);
        assert!(!level.speaking);
    }

    #[test]
    fn test_smoothing_and_gain() {
        let mut monitor = AudioLevelMonitor::new(LevelConfig::default());
        // rms 0.5 -> smoothed 0.1 -> amplified 0.3
        let level = monitor.tick(&[16384, -16384]);
        assert!((level.level - 0.3).abs() < 1e-3);
        assert!(level.speaking);

        // converges toward the clamp
        for _ in 0..50 {
            monitor.tick(&[16384, -16384]);
        }
        assert_eq!(monitor.tick(&[16384, -16384]).level, 1.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let config = LevelConfig {
            smoothing: 0.0,
            gain: 1.0,
            speaking_threshold: 0.5,
            ..Default::default()
        };
        let mut monitor = AudioLevelMonitor::new(config);
        assert!(!monitor.tick(&[16384, -16384]).speaking);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut monitor = AudioLevelMonitor::new(LevelConfig::default());
        monitor.tick(&[30000; 64]);
        monitor.reset();
        assert_eq!(monitor.tick(&[]).level, 0.0);
    }
}
