mod controller;
mod pipeline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use clap::Parser;

use controller::Controller;
use iql_net::control::ControlServer;
use iql_net::udp::{UdpSink, UdpSource};

#[derive(Parser, Debug)]
#[command(name = "iqlinkd")]
#[command(about = "Stream I/Q samples between an SDR device and the network, with erasure-coded UDP transport")]
struct Cli {
    /// Device type: rtlsdr, hackrf, airspy, bladerf, test, file
    #[arg(short = 't', long, default_value = "test")]
    devtype: String,

    /// Device index, or 'list' to enumerate devices
    #[arg(short = 'd', long, default_value = "0")]
    dev: String,

    /// Direction: rx (device to network) or tx (network to device)
    #[arg(short = 'm', long, default_value = "rx")]
    mode: String,

    /// Remote address (rx) or local bind address (tx) for data datagrams
    #[arg(short = 'I', long, default_value = "127.0.0.1")]
    address: String,

    /// Data datagram port
    #[arg(short = 'D', long, default_value_t = 9090)]
    dataport: u16,

    /// Control message port
    #[arg(short = 'C', long, default_value_t = 9091)]
    cfgport: u16,

    /// Startup configuration: comma separated key=value pairs, bare keys
    /// for switches
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Output buffer size in seconds before the device starts consuming (tx)
    #[arg(short = 'b', long)]
    buffer: Option<f64>,
}

fn list_and_exit(devtype: &str) -> ! {
    match iql_sdr::list_devices(devtype) {
        Ok(names) => {
            eprintln!("Found {} device(s):", names.len());
            for (i, name) in names.iter().enumerate() {
                eprintln!("{:2}: {}", i, name);
            }
        }
        Err(e) => eprintln!("ERROR: {}", e),
    }
    std::process::exit(1);
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    eprintln!("iqlinkd - stream I/Q samples over UDP with erasure protection");

    if let Err(e) = run(cli) {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    if cli.mode != "rx" && cli.mode != "tx" {
        return Err(format!("invalid mode '{}' (expected rx or tx)", cli.mode));
    }

    if cli.dev == "list" {
        list_and_exit(&cli.devtype);
    }
    let devidx: usize = match cli.dev.parse() {
        Ok(idx) => idx,
        Err(_) => list_and_exit(&cli.devtype),
    };

    let device = iql_sdr::open(&cli.devtype, devidx)?;
    let device = Arc::new(Mutex::new(device));
    let controller = Arc::new(Controller::new(device.clone()));

    if let Some(config) = &cli.config {
        let reply = controller.apply(config);
        log::info!("startup configuration: {}", reply);
    }

    {
        let snap = controller.snapshot();
        let dev = device.lock().unwrap();
        eprintln!(
            "tuned for:         {:.6} MHz",
            dev.get_frequency() as f64 * 1e-6
        );
        eprintln!("IF sample rate:    {} Hz", snap.device_rate);
        if snap.log2_factor > 0 {
            eprintln!(
                "stream rate:       {} Hz (/{} halfband)",
                snap.stream_rate,
                1u32 << snap.log2_factor
            );
        }
        dev.print_specific_parms();
    }

    // process-wide stop flag, raised by SIGINT/SIGTERM
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            eprintln!("\ngot stop signal, draining ...");
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| format!("cannot install signal handler: {}", e))?;
    }

    // control channel on its own thread
    let control = ControlServer::bind(cli.cfgport)?;
    let control_running = Arc::new(AtomicBool::new(true));
    let control_thread = {
        let running = control_running.clone();
        let controller = controller.clone();
        std::thread::spawn(move || {
            control.run(&running, |msg| {
                let reply = controller.apply(msg);
                log::info!("control: '{}' -> '{}'", msg, reply);
                reply
            });
        })
    };

    let result = match cli.mode.as_str() {
        "rx" => {
            let sink = UdpSink::connect(&cli.address, cli.dataport)?;
            eprintln!("sending data to:   {}:{}", cli.address, cli.dataport);
            pipeline::run_rx(&controller, &device, &sink, &stop)
        }
        _ => {
            let source = UdpSource::bind(&cli.address, cli.dataport, stop.clone())?;
            eprintln!("data port:         {}:{}", cli.address, cli.dataport);
            let min_fill = match cli.buffer {
                Some(secs) if secs > 0.0 => {
                    (secs * controller.snapshot().device_rate as f64) as usize
                }
                _ => 250_000,
            };
            pipeline::run_tx(&controller, &device, source, min_fill, &stop)
        }
    };

    control_running.store(false, Ordering::SeqCst);
    control_thread
        .join()
        .map_err(|_| "control thread panicked".to_string())?;

    result?;

    if let Some(e) = device.lock().unwrap().error() {
        return Err(format!("device: {}", e));
    }

    log::info!("clean shutdown");
    Ok(())
}
