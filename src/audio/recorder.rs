//! Session recorder - saves both directions of a live session as WAV files

use super::Result;
use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

type Writer = WavWriter<BufWriter<File>>;

pub const INPUT_FILE: &str = "input_16k.wav";
pub const OUTPUT_FILE: &str = "output_24k.wav";

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

pub struct SessionRecorder {
    dir: PathBuf,
    input: Option<Writer>,
    output: Option<Writer>,
}

impl SessionRecorder {
    /// Open `<root>/<YYYYmmdd_HHMMSS>/` and both WAV files in it, with
    /// headers at the rates the session actually captures and plays.
    pub fn create(root: &Path, input_rate: u32, output_rate: u32) -> Result<Self> {
        let ts = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let dir = root.join(ts);
        fs::create_dir_all(&dir)?;

        let input = WavWriter::create(dir.join(INPUT_FILE), wav_spec(input_rate))?;
        let output = WavWriter::create(dir.join(OUTPUT_FILE), wav_spec(output_rate))?;
        info!("Recording session audio to {:?}", dir);

        Ok(Self {
            dir,
            input: Some(input),
            output: Some(output),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_input(&mut self, samples: &[i16]) {
        write_samples(self.input.as_mut(), samples, "input");
    }

    pub fn record_output(&mut self, samples: &[i16]) {
        write_samples(self.output.as_mut(), samples, "output");
    }

    /// Flush and close both files. Further writes are ignored.
    pub fn finish(&mut self) {
        for (name, writer) in [("input", self.input.take()), ("output", self.output.take())] {
            if let Some(writer) = writer {
                match writer.finalize() {
                    Ok(()) => debug!("Closed {} recording", name),
                    Err(e) => error!("Failed to finalize {} recording: {}", name, e),
                }
            }
        }
    }
}

fn write_samples(writer: Option<&mut Writer>, samples: &[i16], name: &str) {
    let Some(writer) = writer else {
        return;
    };
    for &s in samples {
        if let Err(e) = writer.write_sample(s) {
            error!("Failed to write {} audio: {}", name, e);
            return;
        }
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}
