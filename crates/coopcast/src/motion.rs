//! Motion sensor boundary and a sysfs GPIO poller for PIR sensors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::HardwareError;

/// Delivers motion events. Callers loop on `next_motion`; the rate is up to
/// the sensor.
#[async_trait]
pub trait MotionSource: Send {
    /// Wait for the next motion event and return when it was seen.
    async fn next_motion(&mut self) -> Result<Instant, HardwareError>;
}

/// PIR sensor wired to a GPIO pin, read through `/sys/class/gpio`.
///
/// The value file is polled; a 0→1 transition is one motion event. Holding
/// high does not repeat.
pub struct SysfsMotionSensor {
    pin: u32,
    value_path: PathBuf,
    poll_interval: Duration,
    last_level: bool,
}

impl SysfsMotionSensor {
    /// Export the pin if needed, set it as an input and take an initial reading.
    pub async fn open(
        gpio_root: &Path,
        pin: u32,
        poll_interval: Duration,
    ) -> Result<Self, HardwareError> {
        let pin_dir = gpio_root.join(format!("gpio{}", pin));
        let gpio_err = |source| HardwareError::Gpio { pin, source };

        if !tokio::fs::try_exists(&pin_dir).await.unwrap_or(false) {
            info!(gpio.pin = pin, "Exporting GPIO pin");
            tokio::fs::write(gpio_root.join("export"), pin.to_string())
                .await
                .map_err(gpio_err)?;
        }

        let direction = pin_dir.join("direction");
        if tokio::fs::try_exists(&direction).await.unwrap_or(false) {
            tokio::fs::write(&direction, "in").await.map_err(gpio_err)?;
        }

        let mut sensor = Self {
            pin,
            value_path: pin_dir.join("value"),
            poll_interval,
            last_level: false,
        };
        sensor.last_level = sensor.read_level().await?;
        debug!(gpio.pin = pin, gpio.level = sensor.last_level, "Motion sensor ready");
        Ok(sensor)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    async fn read_level(&self) -> Result<bool, HardwareError> {
        let raw = tokio::fs::read_to_string(&self.value_path)
            .await
            .map_err(|source| HardwareError::Gpio {
                pin: self.pin,
                source,
            })?;
        Ok(raw.trim() == "1")
    }
}

#[async_trait]
impl MotionSource for SysfsMotionSensor {
    async fn next_motion(&mut self) -> Result<Instant, HardwareError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let level = self.read_level().await?;
            let rising = level && !self.last_level;
            self.last_level = level;
            if rising {
                debug!(gpio.pin = self.pin, "Motion edge detected");
                return Ok(Instant::now());
            }
        }
    }
}
