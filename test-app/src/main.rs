// dmclib test application -- CLI tool for exercising the DMC controller
// driver against real hardware or a mock transport.
//
// Usage:
//   dmclib-test-app --host 192.168.0.50:23 info
//   dmclib-test-app --port /dev/ttyUSB0 --baud 115200 cmd "MG _TPA"
//   dmclib-test-app --host 192.168.0.50:23 field _TPA --watch 200
//   dmclib-test-app --host 192.168.0.50:23 --polled 50 monitor --duration 10
//   dmclib-test-app --host 192.168.0.50:23 stress --count 500
//   dmclib-test-app --mock info
//
// Set RUST_LOG=dmclib_dmc=debug (or =trace) to watch the wire traffic.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rand::Rng;

use dmclib::ControllerEvent;
use dmclib::dmc::{DmcController, DmcControllerBuilder};
use dmclib::types::TelemetryMode;
use dmclib_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// dmclib test application -- exercises the controller driver from the
/// command line.
#[derive(Parser)]
#[command(name = "dmclib-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate (default: 115200).
    #[arg(long)]
    baud: Option<u32>,

    /// TCP address of the controller (e.g. 192.168.0.50:23).
    #[arg(long)]
    host: Option<String>,

    /// Use a mock transport with a scripted connect handshake.
    /// Useful for verifying CLI parsing and builder wiring without
    /// hardware; commands after connect will fail.
    #[arg(long)]
    mock: bool,

    /// Per-receive timeout in milliseconds (default: 500).
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    /// Telemetry push period in milliseconds (default: 8).
    #[arg(long, default_value_t = 8)]
    period: u32,

    /// Poll for records at this interval (ms) instead of asking the
    /// controller to stream them.
    #[arg(long)]
    polled: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print controller identification and field map summary.
    Info,

    /// Send a raw command and print the reply text.
    Cmd {
        /// Command text, e.g. "MG _TPA" or "TP;RP".
        command: String,
    },

    /// Decode one named field from the latest telemetry record.
    Field {
        /// Field name, e.g. _TPA, TIME, @IN[3].
        name: String,

        /// Keep printing the value at this interval (ms); 0 = once.
        #[arg(long, default_value_t = 0)]
        watch: u64,
    },

    /// List every field the connected model's map defines.
    Fields,

    /// Subscribe to controller events and print them in real time.
    Monitor {
        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,

        /// Also print every telemetry record (noisy at short periods).
        #[arg(long)]
        records: bool,
    },

    /// Stress test: rapid-fire command exchanges with latency stats.
    Stress {
        /// Number of exchanges.
        #[arg(long, default_value_t = 100)]
        count: u32,

        /// Command to exchange (default reads axis positions).
        #[arg(long, default_value = "TP")]
        command: String,

        /// Random inter-command delay ceiling in milliseconds (0 = none).
        #[arg(long, default_value_t = 0)]
        jitter_ms: u64,
    },
}

// ---------------------------------------------------------------------------
// Controller construction
// ---------------------------------------------------------------------------

/// Construct and connect a controller from CLI arguments.
async fn create_controller(cli: &Cli) -> Result<DmcController> {
    let telemetry = match cli.polled {
        Some(interval_ms) => TelemetryMode::Polled { interval_ms },
        None => TelemetryMode::Push {
            period_ms: cli.period,
        },
    };

    let mut builder = DmcControllerBuilder::new()
        .command_timeout(Duration::from_millis(cli.timeout_ms))
        .telemetry(telemetry);

    let controller = if cli.mock {
        if cli.port.is_some() || cli.host.is_some() {
            bail!("--mock replaces --port/--host");
        }
        builder
            .telemetry(TelemetryMode::Polled {
                interval_ms: 60_000,
            })
            .build_with_transport(Box::new(scripted_mock()))
    } else {
        match (&cli.port, &cli.host) {
            (Some(port), None) => {
                builder = builder.serial_port(port);
                if let Some(baud) = cli.baud {
                    builder = builder.baud_rate(baud);
                }
                builder.build().context("failed to build controller")?
            }
            (None, Some(host)) => builder
                .tcp(host)
                .build()
                .context("failed to build controller")?,
            (None, None) => bail!("one of --port, --host, or --mock is required"),
            (Some(_), Some(_)) => bail!("--port and --host are mutually exclusive"),
        }
    };

    controller
        .connect()
        .await
        .context("failed to connect to controller")?;
    println!("Connected -- {}", controller.model());
    Ok(controller)
}

/// A mock transport preloaded with the connect handshake of a
/// single-axis DMC-30010 so `--mock` gets past `connect()`.
fn scripted_mock() -> MockTransport {
    let mut mock = MockTransport::new();
    mock.expect(b"\x12\x16\r", b"DMC30010 Rev 1.2a (mock)\r\n:");
    mock.expect(b"MG _BN\r", b"0.0000\r\n:");
    mock.expect(b"MG _BV\r", b"1.0000\r\n:");
    mock.expect(b"QZ\r", b"4,18,0,0\r\n:");
    mock.expect(b"WH\r", b"IHA\r\n:");
    mock.expect(b"CF A\r", b":");
    mock.expect(b"CW 1\r", b":");
    mock
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_info(controller: &DmcController) -> Result<()> {
    println!("Model:         {}", controller.model());
    println!(
        "Serial number: {}",
        controller.serial_number().as_deref().unwrap_or("(unknown)")
    );
    match controller.field_map() {
        Some(map) => {
            println!("Record size:   {} bytes", map.record_size());
            println!("Fields:        {}", map.len());
        }
        None => println!("No field map installed"),
    }
    Ok(())
}

async fn cmd_exchange(controller: &DmcController, command: &str) -> Result<()> {
    let started = Instant::now();
    let reply = controller
        .exchange(command)
        .await
        .with_context(|| format!("exchange '{command}' failed"))?;
    println!("{reply}");
    eprintln!("({} us)", started.elapsed().as_micros());
    Ok(())
}

async fn cmd_field(controller: &DmcController, name: &str, watch_ms: u64) -> Result<()> {
    let known = controller
        .field_map()
        .map(|map| map.descriptor(name).is_some())
        .unwrap_or(false);
    if !known {
        bail!("field '{name}' is not in this model's map (try `fields`)");
    }

    loop {
        match controller.try_field_value(name) {
            Some(value) => println!("{name} = {value}"),
            None => println!("{name} = (no record yet)"),
        }
        if watch_ms == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(watch_ms)).await;
    }
}

async fn cmd_fields(controller: &DmcController) -> Result<()> {
    let map = controller.field_map().context("no field map installed")?;
    let mut names: Vec<&str> = map.names().collect();
    names.sort_unstable();
    for name in names {
        println!("{name}");
    }
    Ok(())
}

async fn cmd_monitor(controller: &DmcController, duration: u64, records: bool) -> Result<()> {
    let mut events = controller.subscribe();
    let deadline = if duration > 0 {
        Some(Instant::now() + Duration::from_secs(duration))
    } else {
        None
    };
    let started = Instant::now();
    let mut record_count: u64 = 0;

    println!("Monitoring events (Ctrl-C to stop)...");
    loop {
        let event = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, events.recv()).await {
                    Ok(event) => event,
                    Err(_) => break,
                }
            }
            None => events.recv().await,
        };

        let stamp = started.elapsed().as_secs_f64();
        match event {
            Ok(ControllerEvent::Record(record)) => {
                record_count += 1;
                if records {
                    println!(
                        "[{stamp:9.3}] record #{record_count} ({} bytes)",
                        record.len()
                    );
                }
            }
            Ok(ControllerEvent::AxisHomed { axis }) => {
                println!("[{stamp:9.3}] axis {} homed", axis.letter());
            }
            Ok(ControllerEvent::HomingComplete { axis }) => {
                println!("[{stamp:9.3}] axis {} homing complete", axis.letter());
            }
            Ok(ControllerEvent::Unsolicited { name, axis, value }) => {
                let axis = axis.map(|a| a.letter().to_string()).unwrap_or_default();
                println!("[{stamp:9.3}] unsolicited {name}{axis} = {value}");
            }
            Ok(ControllerEvent::Connected) => {
                println!("[{stamp:9.3}] connected");
            }
            Ok(ControllerEvent::Disconnected) => {
                println!("[{stamp:9.3}] disconnected");
                break;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("[{stamp:9.3}] lagged, {n} events dropped");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    println!(
        "\n{} telemetry records in {:.1}s",
        record_count,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn cmd_stress(
    controller: &DmcController,
    count: u32,
    command: &str,
    jitter_ms: u64,
) -> Result<()> {
    let mut rng = rand::thread_rng();
    let mut latencies_us: Vec<u128> = Vec::with_capacity(count as usize);
    let mut errors: u32 = 0;
    let started = Instant::now();

    for i in 0..count {
        let sent = Instant::now();
        match controller.exchange(command).await {
            Ok(_) => latencies_us.push(sent.elapsed().as_micros()),
            Err(e) => {
                errors += 1;
                eprintln!("exchange {i} failed: {e}");
            }
        }
        if jitter_ms > 0 {
            let delay = rng.gen_range(0..=jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    let elapsed = started.elapsed();
    println!(
        "{} exchanges in {:.2}s ({:.0}/s), {} errors",
        count,
        elapsed.as_secs_f64(),
        count as f64 / elapsed.as_secs_f64(),
        errors
    );
    if !latencies_us.is_empty() {
        latencies_us.sort_unstable();
        let min = latencies_us[0];
        let max = latencies_us[latencies_us.len() - 1];
        let avg = latencies_us.iter().sum::<u128>() / latencies_us.len() as u128;
        let p99 = latencies_us[latencies_us.len() * 99 / 100];
        println!("latency us: min {min}  avg {avg}  p99 {p99}  max {max}");
    }
    if errors > 0 {
        bail!("{errors} of {count} exchanges failed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let controller = create_controller(&cli).await?;

    let result = match &cli.command {
        Command::Info => cmd_info(&controller).await,
        Command::Cmd { command } => cmd_exchange(&controller, command).await,
        Command::Field { name, watch } => cmd_field(&controller, name, *watch).await,
        Command::Fields => cmd_fields(&controller).await,
        Command::Monitor { duration, records } => {
            cmd_monitor(&controller, *duration, *records).await
        }
        Command::Stress {
            count,
            command,
            jitter_ms,
        } => cmd_stress(&controller, *count, command, *jitter_ms).await,
    };

    controller.disconnect().await.ok();
    result
}
