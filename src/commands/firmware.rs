//! Firmware flash command

use super::Device;
use indicatif::{ProgressBar, ProgressStyle};
use mxt_core::bootloader::FlashProgress;
use std::path::Path;

/// Create a progress bar style for frame uploads
fn create_progress_bar_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")?
        .progress_chars("#>-"))
}

/// Progress reporter using an indicatif progress bar
pub struct IndicatifFlashProgress {
    bar: Option<ProgressBar>,
    retries: u32,
}

impl IndicatifFlashProgress {
    pub fn new() -> Self {
        Self {
            bar: None,
            retries: 0,
        }
    }
}

impl Default for IndicatifFlashProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashProgress for IndicatifFlashProgress {
    fn frames_total(&mut self, frames: usize, bytes: usize) {
        let pb = ProgressBar::new(bytes as u64);
        pb.set_style(create_progress_bar_style().unwrap_or_else(|_| ProgressStyle::default_bar()));
        pb.set_message(format!("0/{} frames", frames));
        self.bar = Some(pb);
    }

    fn frame_sent(&mut self, frame: usize, bytes_done: usize) {
        if let Some(pb) = &self.bar {
            pb.set_position(bytes_done as u64);
            pb.set_message(format!("frame {}", frame + 1));
        }
    }

    fn retry(&mut self, frame: usize, attempt: u32) {
        self.retries += 1;
        if let Some(pb) = &self.bar {
            pb.set_message(format!("frame {} retry {}", frame + 1, attempt));
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_with_message(format!("done, {} retries", self.retries));
        }
    }
}

/// Flash a firmware image
pub fn run_flash(ctl: &mut Device, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data =
        std::fs::read(input).map_err(|e| format!("Failed to read {}: {}", input.display(), e))?;

    let mut progress = IndicatifFlashProgress::new();
    let result = ctl.flash_firmware(&data, &mut progress);
    if let Some(pb) = progress.bar.take() {
        pb.abandon_with_message("aborted");
    }
    let report = result?;

    println!(
        "Flashed {} frames ({} bytes, {} retries)",
        report.frames, report.bytes, report.retries
    );
    if let Some(dir) = ctl.directory() {
        println!("Device now runs: {}", dir.info());
    }
    Ok(())
}
