// Copyright 2025-2026 CEMAXECUTER LLC

//! Raw IQ file adapter: CS16 little-endian, interleaved I/Q.
//!
//! As a producer it replays the file paced to the configured sample rate
//! and signals end of stream at EOF; as a consumer it appends the
//! reconstructed stream to the file.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{self, ConfigMap, Outcome};
use crate::{Device, SampleBuffer, StreamRole};

/// Complex samples read or written per iteration.
const CHUNK_SAMPLES: usize = 65536;

pub struct FileDevice {
    path: Option<PathBuf>,
    freq_hz: u64,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
    worker: Option<JoinHandle<()>>,
}

impl Default for FileDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FileDevice {
    pub fn new() -> Self {
        Self {
            path: None,
            freq_hz: 100_000_000,
            sample_rate: 1_000_000,
            running: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    fn read_chunk(reader: &mut BufReader<File>) -> io::Result<Option<Vec<i16>>> {
        let mut raw = vec![0u8; CHUNK_SAMPLES * 4];
        let mut filled = 0;
        while filled < raw.len() {
            match reader.read(&mut raw[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        if filled < 4 {
            return Ok(None);
        }
        let samples = filled / 4;
        let mut out = Vec::with_capacity(samples * 2);
        for pair in raw[..samples * 4].chunks_exact(4) {
            out.push(i16::from_le_bytes([pair[0], pair[1]]));
            out.push(i16::from_le_bytes([pair[2], pair[3]]));
        }
        Ok(Some(out))
    }
}

impl Device for FileDevice {
    fn configure(&mut self, cfg: &ConfigMap) -> Vec<(String, Outcome)> {
        let mut outcomes = Vec::new();
        for (key, value) in cfg.pairs() {
            let outcome = match key.as_str() {
                "file" => match value.as_deref() {
                    Some(path) if !path.is_empty() => {
                        if self.worker.is_some() {
                            Outcome::Rejected("busy".into())
                        } else {
                            self.path = Some(PathBuf::from(path));
                            Outcome::Ok
                        }
                    }
                    _ => Outcome::Rejected("parse".into()),
                },
                "freq" => match config::numeric::<u64>(value) {
                    Ok(v) => {
                        self.freq_hz = v;
                        Outcome::Ok
                    }
                    Err(o) => o,
                },
                "srate" => match config::numeric::<u32>(value) {
                    Ok(v) if v > 0 => {
                        self.sample_rate = v;
                        Outcome::Ok
                    }
                    Ok(_) => Outcome::Rejected("range".into()),
                    Err(o) => o,
                },
                _ => continue,
            };
            outcomes.push((key.clone(), outcome));
        }
        outcomes
    }

    fn get_frequency(&self) -> u64 {
        self.freq_hz
    }

    fn get_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn get_device_sample_size(&self) -> (u8, u8) {
        (2, 16)
    }

    fn start(
        &mut self,
        role: StreamRole,
        buffer: Arc<SampleBuffer>,
        stop: Arc<AtomicBool>,
    ) -> Result<(), String> {
        if self.worker.is_some() {
            return Err("file device already streaming".to_string());
        }
        let path = self
            .path
            .clone()
            .ok_or_else(|| "file device needs a file=<path> setting".to_string())?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let failure = self.failure.clone();
        let sample_rate = self.sample_rate;

        let handle = match role {
            StreamRole::Producer => {
                let file = File::open(&path)
                    .map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
                log::info!("replaying IQ from {} at {} Hz", path.display(), sample_rate);
                std::thread::spawn(move || {
                    let mut reader = BufReader::with_capacity(1 << 20, file);
                    let start = Instant::now();
                    let mut replayed: u64 = 0;
                    while running.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
                        match Self::read_chunk(&mut reader) {
                            Ok(Some(chunk)) => {
                                replayed += (chunk.len() / 2) as u64;
                                buffer.push(chunk);
                                let due = Duration::from_secs_f64(
                                    replayed as f64 / sample_rate as f64,
                                );
                                let elapsed = start.elapsed();
                                if due > elapsed {
                                    std::thread::sleep(
                                        (due - elapsed).min(Duration::from_millis(100)),
                                    );
                                }
                            }
                            Ok(None) => {
                                log::info!("end of IQ file");
                                break;
                            }
                            Err(e) => {
                                *failure.lock().unwrap() = Some(format!("read error: {}", e));
                                break;
                            }
                        }
                    }
                    buffer.push_end();
                })
            }
            StreamRole::Consumer => {
                let file = File::create(&path)
                    .map_err(|e| format!("failed to create {}: {}", path.display(), e))?;
                log::info!("writing IQ to {}", path.display());
                std::thread::spawn(move || {
                    let mut writer = BufWriter::with_capacity(1 << 20, file);
                    let refill = sample_rate as usize / 2;
                    loop {
                        if buffer.queued_samples() == 0 {
                            // drained: wait for the buffer to come back to a
                            // workable level before pulling again
                            buffer.wait_buffer_fill(refill);
                        }
                        let samples = buffer.pull();
                        if samples.is_empty() {
                            break;
                        }
                        let mut raw = Vec::with_capacity(samples.len() * 2);
                        for &v in &samples {
                            raw.extend_from_slice(&v.to_le_bytes());
                        }
                        if let Err(e) = writer.write_all(&raw) {
                            *failure.lock().unwrap() = Some(format!("write error: {}", e));
                            break;
                        }
                    }
                    if let Err(e) = writer.flush() {
                        *failure.lock().unwrap() = Some(format!("write error: {}", e));
                    }
                })
            }
        };
        self.worker = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn error(&self) -> Option<String> {
        self.failure.lock().unwrap().clone()
    }

    fn print_specific_parms(&self) {
        if let Some(path) = &self.path {
            eprintln!("file:              {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("iqlink-file-test-{}-{}", std::process::id(), name));
        p
    }

    #[test]
    fn test_requires_path() {
        let mut dev = FileDevice::new();
        let buf = Arc::new(SampleBuffer::new());
        let stop = Arc::new(AtomicBool::new(false));
        assert!(dev.start(StreamRole::Producer, buf, stop).is_err());
    }

    #[test]
    fn test_replay_reaches_end_of_stream() {
        let path = temp_path("replay");
        let samples: Vec<i16> = (0..1000).collect();
        let mut raw = Vec::new();
        for &v in &samples {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(&path, &raw).unwrap();

        let mut dev = FileDevice::new();
        dev.configure(&ConfigMap::parse(&format!(
            "file={},srate=1000000",
            path.display()
        )));
        let buf = Arc::new(SampleBuffer::new());
        let stop = Arc::new(AtomicBool::new(false));
        dev.start(StreamRole::Producer, buf.clone(), stop).unwrap();

        let mut got = Vec::new();
        loop {
            let chunk = buf.pull();
            if chunk.is_empty() {
                break;
            }
            got.extend(chunk);
        }
        dev.stop();
        assert_eq!(got, samples);
        assert!(dev.error().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_consumer_writes_stream() {
        let path = temp_path("sink");
        let mut dev = FileDevice::new();
        dev.configure(&ConfigMap::parse(&format!(
            "file={},srate=1000",
            path.display()
        )));
        let buf = Arc::new(SampleBuffer::new());
        let stop = Arc::new(AtomicBool::new(false));
        dev.start(StreamRole::Consumer, buf.clone(), stop).unwrap();

        buf.push(vec![1i16, -1, 2, -2]);
        buf.push_end();
        dev.stop();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw, [1u8, 0, 255, 255, 2, 0, 254, 255]);
        std::fs::remove_file(&path).ok();
    }
}
