// Copyright 2025-2026 CEMAXECUTER LLC

//! Synthetic tone source, for exercising the full chain without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{self, ConfigMap, Outcome};
use crate::{Device, SampleBuffer, StreamRole};

/// Samples generated per iteration of the producer thread.
const CHUNK_SAMPLES: usize = 8192;

#[derive(Debug, Clone, Copy)]
struct TestParams {
    freq_hz: u64,
    sample_rate: u32,
    /// Tone offset from the center frequency, Hz (dfp positive, dfn negative).
    offset_hz: i32,
    /// Amplitude as a fraction of full scale.
    amplitude: f64,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            freq_hz: 100_000_000,
            sample_rate: 1_000_000,
            offset_hz: 100_000,
            amplitude: 0.5,
        }
    }
}

pub struct TestSource {
    params: Arc<Mutex<TestParams>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Default for TestSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSource {
    pub fn new() -> Self {
        Self {
            params: Arc::new(Mutex::new(TestParams::default())),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl Device for TestSource {
    fn configure(&mut self, cfg: &ConfigMap) -> Vec<(String, Outcome)> {
        let mut outcomes = Vec::new();
        let mut params = self.params.lock().unwrap();
        for (key, value) in cfg.pairs() {
            let outcome = match key.as_str() {
                "freq" => match config::numeric::<u64>(value) {
                    Ok(v) => {
                        params.freq_hz = v;
                        Outcome::Ok
                    }
                    Err(o) => o,
                },
                "srate" => match config::numeric::<u32>(value) {
                    Ok(v) if v > 0 => {
                        params.sample_rate = v;
                        Outcome::Ok
                    }
                    Ok(_) => Outcome::Rejected("range".into()),
                    Err(o) => o,
                },
                "dfp" => match config::numeric::<u32>(value) {
                    Ok(v) => {
                        params.offset_hz = v as i32;
                        Outcome::Ok
                    }
                    Err(o) => o,
                },
                "dfn" => match config::numeric::<u32>(value) {
                    Ok(v) => {
                        params.offset_hz = -(v as i32);
                        Outcome::Ok
                    }
                    Err(o) => o,
                },
                "power" => match config::numeric::<u32>(value) {
                    Ok(v) => {
                        let clamped = v.min(100);
                        params.amplitude = clamped as f64 / 100.0;
                        if clamped == v { Outcome::Ok } else { Outcome::Clamped }
                    }
                    Err(o) => o,
                },
                _ => continue,
            };
            outcomes.push((key.clone(), outcome));
        }
        outcomes
    }

    fn get_frequency(&self) -> u64 {
        self.params.lock().unwrap().freq_hz
    }

    fn get_sample_rate(&self) -> u32 {
        self.params.lock().unwrap().sample_rate
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
        if role != StreamRole::Producer {
            return Err("test source cannot consume samples".to_string());
        }
        if self.worker.is_some() {
            return Err("test source already streaming".to_string());
        }

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let params = self.params.clone();

        let handle = std::thread::spawn(move || {
            let mut phase = 0.0f64;
            let start = Instant::now();
            let mut generated: u64 = 0;

            while running.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
                let p = *params.lock().unwrap();
                let step =
                    2.0 * std::f64::consts::PI * p.offset_hz as f64 / p.sample_rate as f64;
                let scale = p.amplitude * 32767.0;

                let mut chunk = Vec::with_capacity(2 * CHUNK_SAMPLES);
                for _ in 0..CHUNK_SAMPLES {
                    chunk.push((scale * phase.cos()) as i16);
                    chunk.push((scale * phase.sin()) as i16);
                    phase += step;
                    if phase > std::f64::consts::PI {
                        phase -= 2.0 * std::f64::consts::PI;
                    }
                }
                buffer.push(chunk);

                // pace against the wall clock so the rate holds long-term
                generated += CHUNK_SAMPLES as u64;
                let due = Duration::from_secs_f64(generated as f64 / p.sample_rate as f64);
                let elapsed = start.elapsed();
                if due > elapsed {
                    std::thread::sleep((due - elapsed).min(Duration::from_millis(100)));
                }
            }
        });
        self.worker = Some(handle);

        log::info!("test source started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        log::info!("test source stopped");
    }

    fn print_specific_parms(&self) {
        let p = self.params.lock().unwrap();
        eprintln!(
            "tone offset:       {} Hz at {:.0}% of full scale",
            p.offset_hz,
            p.amplitude * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_core_keys() {
        let mut src = TestSource::new();
        let cfg = ConfigMap::parse("freq=433970000,srate=250000,dfn=5000,power=120");
        let outcomes = src.configure(&cfg);
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0], ("freq".to_string(), Outcome::Ok));
        assert_eq!(outcomes[3], ("power".to_string(), Outcome::Clamped));
        assert_eq!(src.get_frequency(), 433_970_000);
        assert_eq!(src.get_sample_rate(), 250_000);
        assert_eq!(src.params.lock().unwrap().offset_hz, -5000);
    }

    #[test]
    fn test_unrecognized_keys_not_claimed() {
        let mut src = TestSource::new();
        let outcomes = src.configure(&ConfigMap::parse("bwfilter=2.5,freq=1000000"));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, "freq");
    }

    #[test]
    fn test_producer_only() {
        let mut src = TestSource::new();
        let buf = Arc::new(SampleBuffer::new());
        let stop = Arc::new(AtomicBool::new(false));
        assert!(src.start(StreamRole::Consumer, buf, stop).is_err());
    }

    #[test]
    fn test_streams_until_stopped() {
        let mut src = TestSource::new();
        src.configure(&ConfigMap::parse("srate=1000000,power=50"));
        let buf = Arc::new(SampleBuffer::new());
        let stop = Arc::new(AtomicBool::new(false));
        src.start(StreamRole::Producer, buf.clone(), stop.clone())
            .unwrap();
        let chunk = buf.pull();
        assert_eq!(chunk.len(), 2 * CHUNK_SAMPLES);
        // amplitude near 50% of full scale somewhere in the chunk
        let peak = chunk.iter().map(|&v| (v as i32).abs()).max().unwrap();
        assert!((15000..=16384).contains(&peak), "peak={}", peak);
        stop.store(true, Ordering::SeqCst);
        src.stop();
    }
}
