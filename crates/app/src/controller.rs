// Copyright 2025-2026 CEMAXECUTER LLC

//! Live configuration: parses key=value strings, applies device keys
//! through the adapter and publishes DSP/packaging parameters as a
//! sequence-numbered snapshot that the worker picks up at frame
//! boundaries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use iql_dsp::{FcPos, MAX_LOG2_FACTOR};
use iql_protocol::packer::StreamParams;
use iql_protocol::MAX_FEC_BLOCKS;
use iql_sdr::config::{self, ConfigMap, Outcome};
use iql_sdr::Device;

/// One coherent view of every parameter the data path needs. The worker
/// refreshes it whenever the sequence number moves, so no frame mixes two
/// configurations.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub seq: u64,
    pub center_freq_khz: u32,
    /// Device-side rate, Hz.
    pub device_rate: u32,
    /// Stream rate after decimation/interpolation, Hz.
    pub stream_rate: u32,
    pub sample_bytes: u8,
    pub sample_bits: u8,
    pub log2_factor: u32,
    pub fc_pos: FcPos,
    pub fec_blocks: u8,
    pub tx_delay_us: u32,
}

impl Snapshot {
    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            center_freq_khz: self.center_freq_khz,
            sample_rate: self.stream_rate,
            sample_bytes: self.sample_bytes,
            sample_bits: self.sample_bits,
            fec_blocks: self.fec_blocks,
        }
    }
}

/// Core keys the controller applies itself; everything else goes to the
/// device adapter.
enum CoreKey {
    Factor(u32),
    FcPos(u32),
    FecBlocks(u32),
    TxDelay(u32),
}

pub struct Controller {
    device: Arc<Mutex<Box<dyn Device>>>,
    state: Mutex<Snapshot>,
    seq: AtomicU64,
}

impl Controller {
    pub fn new(device: Arc<Mutex<Box<dyn Device>>>) -> Self {
        let snapshot = {
            let dev = device.lock().unwrap();
            let (bytes, bits) = dev.get_device_sample_size();
            Snapshot {
                seq: 0,
                center_freq_khz: (dev.get_frequency() / 1000) as u32,
                device_rate: dev.get_sample_rate(),
                stream_rate: dev.get_sample_rate(),
                sample_bytes: bytes,
                sample_bits: bits,
                log2_factor: 0,
                fc_pos: FcPos::Center,
                fec_blocks: 0,
                tx_delay_us: 0,
            }
        };
        Self {
            device,
            state: Mutex::new(snapshot),
            seq: AtomicU64::new(0),
        }
    }

    /// Cheap poll for the worker's frame-boundary check.
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.state.lock().unwrap()
    }

    /// Parse and apply one configuration string, returning the per-key
    /// reply. If any core key fails to parse, nothing is applied.
    pub fn apply(&self, text: &str) -> String {
        let cfg = ConfigMap::parse(text);
        if cfg.is_empty() {
            return "error=rejected:empty".to_string();
        }

        // Phase 1: parse every core key up front.
        let mut core: Vec<(usize, CoreKey)> = Vec::new();
        let mut failures: Vec<(usize, Outcome)> = Vec::new();
        let mut device_pairs: Vec<(String, Option<String>)> = Vec::new();
        for (i, (key, value)) in cfg.pairs().iter().enumerate() {
            let parsed = match key.as_str() {
                "decim" | "interp" => config::numeric::<u32>(value).map(CoreKey::Factor),
                "fcpos" => config::numeric::<u32>(value).map(CoreKey::FcPos),
                "fecblk" => config::numeric::<u32>(value).map(CoreKey::FecBlocks),
                "txdelay" => config::numeric::<u32>(value).map(CoreKey::TxDelay),
                _ => {
                    device_pairs.push((key.clone(), value.clone()));
                    continue;
                }
            };
            match parsed {
                Ok(core_key) => core.push((i, core_key)),
                Err(outcome) => failures.push((i, outcome)),
            }
        }

        if !failures.is_empty() {
            // no key is applied; report the parse failures, mark the rest
            // untouched
            let mut outcomes: Vec<Outcome> =
                vec![Outcome::Rejected("unapplied".into()); cfg.pairs().len()];
            for (i, outcome) in failures {
                outcomes[i] = outcome;
            }
            return render_reply(&cfg, &outcomes);
        }

        let mut outcomes: Vec<Outcome> = vec![Outcome::Ignored; cfg.pairs().len()];

        // Phase 2: apply under one critical section so the snapshot never
        // exposes a half-applied configuration.
        {
            let mut state = self.state.lock().unwrap();
            let mut device = self.device.lock().unwrap();

            // device-level keys first
            if !device_pairs.is_empty() {
                let device_cfg = ConfigMap::from_pairs(device_pairs.clone());
                let device_outcomes = device.configure(&device_cfg);
                for (i, (key, _)) in cfg.pairs().iter().enumerate() {
                    if let Some((_, outcome)) =
                        device_outcomes.iter().find(|(k, _)| k == key)
                    {
                        outcomes[i] = outcome.clone();
                    } else if device_pairs.iter().any(|(k, _)| k == key) {
                        log::warn!("unknown configuration key '{}' ignored", key);
                    }
                }
            }

            state.center_freq_khz = (device.get_frequency() / 1000) as u32;
            state.device_rate = device.get_sample_rate();
            let (native_bytes, native_bits) = device.get_device_sample_size();

            // then DSP keys, then packaging keys
            for (i, core_key) in core {
                outcomes[i] = match core_key {
                    CoreKey::Factor(v) => {
                        state.log2_factor = v.min(MAX_LOG2_FACTOR);
                        if v > MAX_LOG2_FACTOR { Outcome::Clamped } else { Outcome::Ok }
                    }
                    CoreKey::FcPos(v) => match FcPos::from_index(v) {
                        Some(pos) => {
                            state.fc_pos = pos;
                            Outcome::Ok
                        }
                        None => Outcome::Rejected("range".into()),
                    },
                    CoreKey::FecBlocks(v) => {
                        state.fec_blocks = v.min(MAX_FEC_BLOCKS as u32) as u8;
                        if v > MAX_FEC_BLOCKS as u32 { Outcome::Clamped } else { Outcome::Ok }
                    }
                    CoreKey::TxDelay(v) => {
                        state.tx_delay_us = v;
                        Outcome::Ok
                    }
                };
            }

            state.stream_rate = state.device_rate >> state.log2_factor;
            if state.log2_factor > 0 {
                // decimation promotes the stream to 16 bits
                state.sample_bytes = 2;
                state.sample_bits = 16;
            } else {
                state.sample_bytes = native_bytes;
                state.sample_bits = native_bits;
            }

            let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
            state.seq = seq;
        }

        render_reply(&cfg, &outcomes)
    }
}

fn render_reply(cfg: &ConfigMap, outcomes: &[Outcome]) -> String {
    cfg.pairs()
        .iter()
        .zip(outcomes)
        .map(|((key, _), outcome)| format!("{}={}", key, outcome))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use iql_sdr::test_source::TestSource;

    fn controller() -> Controller {
        let device: Arc<Mutex<Box<dyn Device>>> =
            Arc::new(Mutex::new(Box::new(TestSource::new())));
        Controller::new(device)
    }

    #[test]
    fn test_apply_device_dsp_and_packaging_keys() {
        let ctl = controller();
        let reply = ctl.apply("freq=433970000,decim=5,fcpos=0");
        assert_eq!(reply, "freq=ok,decim=ok,fcpos=ok");
        let snap = ctl.snapshot();
        assert_eq!(snap.center_freq_khz, 433_970);
        assert_eq!(snap.log2_factor, 5);
        assert_eq!(snap.fc_pos, FcPos::Infra);
        assert_eq!(snap.stream_rate, snap.device_rate / 32);
        assert_eq!(snap.seq, 1);
    }

    #[test]
    fn test_parse_failure_applies_nothing() {
        let ctl = controller();
        let before = ctl.snapshot();
        let reply = ctl.apply("decim=abc");
        assert_eq!(reply, "decim=rejected:parse");
        let after = ctl.snapshot();
        assert_eq!(after.seq, before.seq);
        assert_eq!(after.log2_factor, 0);
    }

    #[test]
    fn test_parse_failure_blocks_sibling_keys() {
        let ctl = controller();
        let reply = ctl.apply("freq=433970000,decim=abc");
        assert_eq!(reply, "freq=rejected:unapplied,decim=rejected:parse");
        assert_eq!(ctl.snapshot().center_freq_khz, 100_000);
    }

    #[test]
    fn test_out_of_range_values_clamped() {
        let ctl = controller();
        let reply = ctl.apply("decim=9,fecblk=500");
        assert_eq!(reply, "decim=clamped,fecblk=clamped");
        let snap = ctl.snapshot();
        assert_eq!(snap.log2_factor, MAX_LOG2_FACTOR);
        assert_eq!(snap.fec_blocks, MAX_FEC_BLOCKS as u8);
    }

    #[test]
    fn test_unknown_key_ignored_others_apply() {
        let ctl = controller();
        let reply = ctl.apply("nosuchkey=1,txdelay=250");
        assert_eq!(reply, "nosuchkey=ignored,txdelay=ok");
        assert_eq!(ctl.snapshot().tx_delay_us, 250);
    }

    #[test]
    fn test_fcpos_out_of_range_rejected() {
        let ctl = controller();
        let reply = ctl.apply("fcpos=7,fecblk=8");
        assert_eq!(reply, "fcpos=rejected:range,fecblk=ok");
        let snap = ctl.snapshot();
        assert_eq!(snap.fc_pos, FcPos::Center);
        assert_eq!(snap.fec_blocks, 8);
    }

    #[test]
    fn test_decimation_promotes_sample_width() {
        let ctl = controller();
        ctl.apply("decim=1");
        let snap = ctl.snapshot();
        assert_eq!(snap.sample_bytes, 2);
        assert_eq!(snap.sample_bits, 16);
        assert_eq!(snap.stream_rate, snap.device_rate / 2);
    }

    #[test]
    fn test_every_apply_bumps_sequence() {
        let ctl = controller();
        ctl.apply("txdelay=1");
        ctl.apply("txdelay=2");
        assert_eq!(ctl.snapshot().seq, 2);
        assert_eq!(ctl.seq(), 2);
    }
}
