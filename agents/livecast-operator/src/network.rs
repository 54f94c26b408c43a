//! Network classification and the capture settings it implies.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::probe::HealthProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EffectiveType {
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "slow-2g")]
    Slow2G,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl EffectiveType {
    pub const ALL: [EffectiveType; 5] = [
        EffectiveType::FourG,
        EffectiveType::ThreeG,
        EffectiveType::TwoG,
        EffectiveType::Slow2G,
        EffectiveType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveType::FourG => "4g",
            EffectiveType::ThreeG => "3g",
            EffectiveType::TwoG => "2g",
            EffectiveType::Slow2G => "slow-2g",
            EffectiveType::Unknown => "unknown",
        }
    }

    /// Network Information API thresholds. `downlink` in Mbps.
    pub fn classify(rtt: Option<Duration>, downlink: Option<f64>) -> Self {
        if rtt.is_none() && downlink.is_none() {
            return EffectiveType::Unknown;
        }
        let rtt_ms = rtt.map(|d| d.as_millis()).unwrap_or(0);
        let below = |limit: f64| downlink.is_some_and(|d| d < limit);

        if rtt_ms >= 2000 || below(0.05) {
            EffectiveType::Slow2G
        } else if rtt_ms >= 1400 || below(0.07) {
            EffectiveType::TwoG
        } else if rtt_ms >= 270 || below(0.7) {
            EffectiveType::ThreeG
        } else {
            EffectiveType::FourG
        }
    }
}

impl fmt::Display for EffectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectiveType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown network type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkQuality {
    pub effective_type: EffectiveType,
    /// Mbps
    pub downlink: Option<f64>,
    /// ms
    pub rtt: Option<u32>,
    pub save_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// kbps
    pub bitrate: u32,
}

impl CaptureSettings {
    pub const HD: Self = Self {
        width: 1280,
        height: 720,
        frame_rate: 30,
        bitrate: 2500,
    };
    pub const SD: Self = Self {
        width: 854,
        height: 480,
        frame_rate: 24,
        bitrate: 1200,
    };
    pub const LOW: Self = Self {
        width: 640,
        height: 360,
        frame_rate: 15,
        bitrate: 500,
    };

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

pub fn recommended_quality(quality: &NetworkQuality) -> CaptureSettings {
    if quality.save_data {
        return CaptureSettings::LOW;
    }
    match quality.effective_type {
        EffectiveType::FourG => CaptureSettings::HD,
        EffectiveType::ThreeG => CaptureSettings::SD,
        EffectiveType::TwoG | EffectiveType::Slow2G => CaptureSettings::LOW,
        EffectiveType::Unknown => CaptureSettings::SD,
    }
}

#[async_trait]
pub trait NetworkInfoSource: Send + Sync + 'static {
    async fn sample(&self) -> NetworkQuality;
}

/// Fixed answer, from config or the command line.
pub struct StaticNetworkInfo(pub NetworkQuality);

#[async_trait]
impl NetworkInfoSource for StaticNetworkInfo {
    async fn sample(&self) -> NetworkQuality {
        self.0
    }
}

/// Derives the class from the API round-trip time.
pub struct ProbeNetworkInfo {
    probe: Arc<HealthProbe>,
    save_data: bool,
}

impl ProbeNetworkInfo {
    pub fn new(probe: Arc<HealthProbe>, save_data: bool) -> Self {
        Self { probe, save_data }
    }
}

#[async_trait]
impl NetworkInfoSource for ProbeNetworkInfo {
    async fn sample(&self) -> NetworkQuality {
        let rtt = match self.probe.round_trip().await {
            Ok(rtt) => Some(rtt),
            Err(e) => {
                tracing::debug!(error = %e, "RTT probe failed");
                None
            }
        };
        NetworkQuality {
            effective_type: EffectiveType::classify(rtt, None),
            downlink: None,
            rtt: rtt.map(|d| d.as_millis().min(u32::MAX as u128) as u32),
            save_data: self.save_data,
        }
    }
}

/// Shared view of the operator's network. Subscribers are notified only
/// when a sample differs from the previous one.
pub struct NetworkQualitySampler {
    source: Arc<dyn NetworkInfoSource>,
    current: watch::Sender<NetworkQuality>,
}

impl NetworkQualitySampler {
    pub fn new(source: Arc<dyn NetworkInfoSource>) -> Self {
        let (current, _) = watch::channel(NetworkQuality::default());
        Self { source, current }
    }

    pub async fn sample(&self) -> NetworkQuality {
        let quality = self.source.sample().await;
        self.current.send_if_modified(|current| {
            if *current == quality {
                return false;
            }
            tracing::info!(
                effective_type = %quality.effective_type,
                rtt_ms = ?quality.rtt,
                save_data = quality.save_data,
                "Network quality changed"
            );
            *current = quality;
            true
        });
        quality
    }

    pub fn current(&self) -> NetworkQuality {
        *self.current.borrow()
    }

    /// Capture settings for the last sample. Applied on the next capture.
    pub fn recommended(&self) -> CaptureSettings {
        recommended_quality(&self.current())
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkQuality> {
        self.current.subscribe()
    }

    pub fn spawn_monitor(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let sampler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        sampler.sample().await;
                    }
                }
            }
        })
    }
}
