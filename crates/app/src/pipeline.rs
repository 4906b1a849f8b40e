use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use iql_dsp::{Decimator, Interpolator};
use iql_net::udp::{UdpSink, UdpSource};
use iql_protocol::packer::FramePacker;
use iql_protocol::unpacker::FrameUnpacker;
use iql_sdr::{Device, SampleBuffer, StreamRole};

use crate::controller::Controller;

/// Receive direction: device -> sample buffer -> decimator -> packer ->
/// FEC -> paced UDP sink.
pub fn run_rx(
    controller: &Controller,
    device: &Arc<Mutex<Box<dyn Device>>>,
    sink: &UdpSink,
    stop: &Arc<AtomicBool>,
) -> Result<(), String> {
    let source_buffer = Arc::new(SampleBuffer::new());
    device.lock().unwrap().start(
        StreamRole::Producer,
        source_buffer.clone(),
        stop.clone(),
    )?;

    // On SIGINT/SIGTERM the watcher halts the device and signals end of
    // stream, which bounds how long the worker can sit in pull().
    let finished = Arc::new(AtomicBool::new(false));
    let watcher = {
        let stop = stop.clone();
        let finished = finished.clone();
        let device = device.clone();
        let buffer = source_buffer.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) && !finished.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }
            device.lock().unwrap().stop();
            buffer.push_end();
        })
    };

    let mut snap = controller.snapshot();
    let mut decimator = Decimator::new(snap.log2_factor, snap.fc_pos);
    let mut packer = FramePacker::new(snap.stream_params());

    let mut overrun_warned = false;
    let mut first_block = true;
    let mut dsp_out: Vec<i16> = Vec::new();
    let mut datagrams: Vec<Vec<u8>> = Vec::new();

    loop {
        if !overrun_warned
            && source_buffer.queued_samples() > 10 * snap.device_rate as usize
        {
            log::warn!("input buffer is growing (system too slow)");
            overrun_warned = true;
        }

        let samples = source_buffer.pull();
        if samples.is_empty() {
            break; // end of stream: drained after stop, EOF or device error
        }

        // the first device block is noisy while the IF filters settle
        if first_block {
            first_block = false;
            continue;
        }

        // pick up reconfigurations between frames; the packer drops any
        // partial accumulation so no frame mixes parameter sets
        if controller.seq() != snap.seq {
            snap = controller.snapshot();
            decimator.configure(snap.log2_factor, snap.fc_pos);
            packer.set_params(snap.stream_params());
            log::info!(
                "reconfigured: {} kHz, {} S/s on the wire, fec {}",
                snap.center_freq_khz,
                snap.stream_rate,
                snap.fec_blocks
            );
        }

        dsp_out.clear();
        decimator.process(&samples, &mut dsp_out);

        datagrams.clear();
        packer.push(&dsp_out, &mut datagrams);
        if !datagrams.is_empty() {
            sink.write(&datagrams, snap.tx_delay_us)
                .map_err(|e| format!("UDP send failed: {}", e))?;
        }
    }

    // the frame being accumulated is discarded, not padded
    if packer.pending_samples() > 0 {
        log::info!(
            "discarding partial frame of {} samples",
            packer.pending_samples()
        );
    }

    finished.store(true, Ordering::SeqCst);
    watcher.join().map_err(|_| "watcher thread panicked".to_string())?;
    device.lock().unwrap().stop();
    Ok(())
}

/// Transmit direction: UDP source -> FEC decode -> unpacker ->
/// interpolator -> sample buffer -> device.
pub fn run_tx(
    controller: &Controller,
    device: &Arc<Mutex<Box<dyn Device>>>,
    source: UdpSource,
    min_fill: usize,
    stop: &Arc<AtomicBool>,
) -> Result<(), String> {
    let device_buffer = Arc::new(SampleBuffer::new());
    let mut device_started = false;

    let mut snap = controller.snapshot();
    let mut interpolator = Interpolator::new(snap.log2_factor);
    let mut unpacker = FrameUnpacker::new();

    let mut overrun_warned = false;
    let mut samples: Vec<i16> = Vec::new();
    let mut upsampled: Vec<i16> = Vec::new();

    while !stop.load(Ordering::SeqCst) {
        let Some(dgram) = source.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };

        if controller.seq() != snap.seq {
            snap = controller.snapshot();
            interpolator.configure(snap.log2_factor);
            log::info!("reconfigured: interpolation x{}", 1u32 << snap.log2_factor);
        }

        samples.clear();
        unpacker.push_datagram(&dgram, &mut samples);
        if samples.is_empty() {
            continue;
        }

        upsampled.clear();
        interpolator.process(&samples, &mut upsampled);

        if !overrun_warned
            && device_buffer.queued_samples() > 10 * snap.device_rate as usize
        {
            log::warn!("output buffer is growing (device too slow)");
            overrun_warned = true;
        }
        device_buffer.push(std::mem::take(&mut upsampled));

        // hold the device back until the buffer reaches its nominal level,
        // so the very first DAC pull does not underrun
        if !device_started && device_buffer.queued_samples() >= min_fill {
            device.lock().unwrap().start(
                StreamRole::Consumer,
                device_buffer.clone(),
                stop.clone(),
            )?;
            device_started = true;
        }
    }

    device_buffer.push_end();
    device.lock().unwrap().stop();

    let stats = unpacker.stats();
    log::info!(
        "tx done: {} frames delivered, {} lost, {} CRC failures, {} bad datagrams, {} rejected by length",
        stats.frames_delivered,
        stats.frames_lost,
        stats.crc_failures,
        stats.protocol_errors,
        source.rejected()
    );
    source.join();
    Ok(())
}
