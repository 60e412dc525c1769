//! Status LED. High while scanning or connected, low while idle.

use std::fs;
use std::path::PathBuf;

use log::{debug, trace, warn};

pub trait StatusIndicator {
    fn set(&mut self, on: bool);
}

impl<T: StatusIndicator + ?Sized> StatusIndicator for Box<T> {
    fn set(&mut self, on: bool) {
        (**self).set(on);
    }
}

/// For boards without a usable LED.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn set(&mut self, on: bool) {
        trace!("Status indicator {}", if on { "on" } else { "off" });
    }
}

/// A Linux LED class device, e.g. `/sys/class/leds/led0`.
#[derive(Debug)]
pub struct SysfsLed {
    dir: PathBuf,
    warned: bool,
}

impl SysfsLed {
    pub fn new(name: &str) -> Self {
        Self::at(PathBuf::from("/sys/class/leds").join(name))
    }

    fn at(dir: PathBuf) -> Self {
        // Detach the kernel trigger so the LED follows us only.
        if let Err(err) = fs::write(dir.join("trigger"), "none") {
            debug!("Could not clear trigger of {}: {err}", dir.display());
        }
        SysfsLed { dir, warned: false }
    }
}

impl StatusIndicator for SysfsLed {
    fn set(&mut self, on: bool) {
        let path = self.dir.join("brightness");
        if let Err(err) = fs::write(&path, if on { "1" } else { "0" }) {
            if self.warned {
                debug!("Could not write {}: {err}", path.display());
            } else {
                warn!("Could not write {}: {err}", path.display());
                self.warned = true;
            }
        }
    }
}

/// Remembers every level it was driven to.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingIndicator {
    pub levels: Vec<bool>,
}

#[cfg(test)]
impl StatusIndicator for RecordingIndicator {
    fn set(&mut self, on: bool) {
        self.levels.push(on);
    }
}
