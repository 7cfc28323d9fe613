//! SWO Trace Viewer - Console Entry Point
//!
//! Captures the SWO stream from a Black Magic Probe (or a TCP trace
//! server), decodes ITM stimulus packets and prints the trace lines with
//! channel names and relative timestamps. Intended both as a usable
//! command-line viewer and as the reference harness for the library.

use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use swotrace_rs::{PayloadWidth, TraceSession, TransportConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "swotrace-rs", version, about = "SWO/ITM trace viewer for the Black Magic Probe")]
struct Args {
    /// Connect to a TCP trace server (ip:port) instead of USB
    #[arg(long, value_name = "ADDR:PORT")]
    tcp: Option<SocketAddrV4>,

    /// USB bulk IN endpoint of the probe's trace interface
    #[arg(long, default_value_t = 0x85)]
    endpoint: u8,

    /// Stimulus payload width: auto, 1, 2 or 4
    #[arg(long, default_value = "auto", value_parser = parse_width)]
    datasize: PayloadWidth,

    /// Stimulus channels to enable
    #[arg(long, value_delimiter = ',', default_value = "0")]
    channels: Vec<u8>,

    /// Export the decoded trace to a CSV file on exit
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,

    /// Stop after this many seconds (0 = run until killed)
    #[arg(long, default_value_t = 0)]
    duration: u64,
}

fn parse_width(text: &str) -> Result<PayloadWidth, String> {
    match text {
        "auto" => Ok(PayloadWidth::Auto),
        "1" => Ok(PayloadWidth::Fixed8),
        "2" => Ok(PayloadWidth::Fixed16),
        "4" => Ok(PayloadWidth::Fixed32),
        other => Err(format!("invalid payload width '{}'", other)),
    }
}

fn main() -> swotrace_rs::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,swotrace_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let transport = match args.tcp {
        Some(addr) => TransportConfig::Tcp {
            address: *addr.ip(),
            port: addr.port(),
        },
        None => TransportConfig::Usb {
            endpoint: args.endpoint,
        },
    };

    let mut session = TraceSession::new();
    session.set_payload_width(args.datasize);
    for index in 0..swotrace_rs::CHANNEL_COUNT {
        session
            .registry_mut()
            .set_enabled(index, args.channels.contains(&(index as u8)));
    }

    tracing::info!(%transport, "opening trace channel");
    if let Err(err) = session.open(&transport, Arc::new(|| {})) {
        if let Some(diag) = session.last_init_error() {
            tracing::error!(
                location = diag.location as u8,
                code = diag.code,
                "trace channel not opened"
            );
        }
        return Err(err);
    }

    let started = Instant::now();
    let mut printed = 0usize;
    let mut status_seen = 0usize;
    loop {
        session.process_text(true);
        printed = print_new_lines(&session, printed, false);

        for entry in session.status().iter().skip(status_seen) {
            tracing::warn!(code = entry.code, "{}", entry.text);
        }
        status_seen = session.status().len();
        if session.status().iter().any(|entry| entry.is_error()) {
            break;
        }
        if args.duration > 0 && started.elapsed() >= Duration::from_secs(args.duration) {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // drain whatever is still queued, then release the transport
    session.process_text(true);
    session.close();
    print_new_lines(&session, printed, true);

    let packet_errors = session.packet_errors(false);
    let overflows = session.overflow_errors(false);
    tracing::info!(
        lines = session.store().len(),
        packet_errors,
        overflows,
        "capture finished"
    );

    if let Some(path) = args.csv {
        session.save_csv(&path)?;
        tracing::info!(path = %path.display(), "trace saved");
    }
    Ok(())
}

/// Print lines added since the last call; unsealed tail lines are held
/// back (they may still grow) unless `flush` is set.
fn print_new_lines(session: &TraceSession, mut printed: usize, flush: bool) -> usize {
    let store = session.store();
    while printed < store.len() {
        let line = store.line(printed).expect("index in range");
        if !flush && !line.is_sealed() && printed + 1 == store.len() {
            break;
        }
        let channel = line.channel as usize;
        let name = if channel < swotrace_rs::CHANNEL_COUNT {
            session.registry().name(channel).to_string()
        } else {
            channel.to_string()
        };
        println!("[{}] {} {}", name, line.time_label(), line.text());
        printed += 1;
    }
    printed
}
