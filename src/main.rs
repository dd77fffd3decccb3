use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use smartctl_wrapper::adapters::{self, GatewayConfig, SmartctlGateway};
use smartctl_wrapper::core::{DevicePath, TestKind};
use smartctl_wrapper::logging::{self, LogConfig};
use smartctl_wrapper::{config, context};

#[derive(Parser)]
#[command(name = "smartctl-wrapper")]
#[command(about = "S.M.A.R.T. health queries and self-tests through smartctl", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the smartctl version and whether it is supported
    Version,
    /// List devices smartctl can open
    Scan {
        #[arg(long)]
        json: bool,
    },
    /// Show identity and health details for a device
    Info { device: DevicePath },
    /// Show the current self-test status of a device
    Status {
        device: DevicePath,
        #[arg(long)]
        json: bool,
    },
    /// Run a self-test and follow its progress until it finishes
    Test {
        device: DevicePath,
        #[arg(long, value_enum, default_value_t = TestKind::Short)]
        kind: TestKind,
    },
    /// Abort the self-test running on a device
    Abort { device: DevicePath },
}

#[derive(Args, Serialize)]
struct GlobalArgs {
    /// Config file (defaults to /etc/smartctl-wrapper/config.toml if present)
    #[serde(skip)]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    smartctl_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    poll_interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    command_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true)]
    simulation: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(short, long, global = true)]
    verbose: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::AppConfig::new(cli.global.config.as_deref(), Some(&cli.global))
        .context("Failed to load configuration")?;
    logging::init(LogConfig::from(&config));

    if let Commands::Version = cli.command {
        return run_version(&config).await;
    }

    let gateway = adapters::get_gateway(&config)
        .await
        .context("Failed to set up smartctl")?;
    let ctx = context::AppContext::new(config, gateway);

    match cli.command {
        Commands::Version => Ok(()),
        Commands::Scan { json } => run_scan(&ctx, json).await,
        Commands::Info { device } => run_info(&ctx, &device).await,
        Commands::Status { device, json } => run_status(&ctx, &device, json).await,
        Commands::Test { device, kind } => run_test(&ctx, &device, kind).await,
        Commands::Abort { device } => run_abort(&ctx, &device).await,
    }
}

async fn run_version(config: &config::AppConfig) -> Result<()> {
    let gateway = SmartctlGateway::new(GatewayConfig::from(config));
    let version = gateway
        .version()
        .await
        .context("Failed to run smartctl -V")?;

    let support = if version.is_supported() {
        "supported"
    } else {
        "unsupported, 7.0 or newer is required"
    };
    println!("smartctl {} ({})", version, support);
    if let Some(platform) = &version.platform {
        println!("  platform: {}", platform);
    }
    Ok(())
}

async fn run_scan(ctx: &context::AppContext, json: bool) -> Result<()> {
    let devices = ctx
        .gateway()
        .scan()
        .await
        .context("Failed to scan for devices")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices found");
    }
    for device in devices {
        println!(
            "{:<16} {:<8} {:<6} {}",
            device.path, device.device_type, device.protocol, device.info_name
        );
    }
    Ok(())
}

async fn run_info(ctx: &context::AppContext, device: &DevicePath) -> Result<()> {
    if ctx.config.simulation {
        bail!("info needs a real smartctl binary; use `status` in simulation mode");
    }

    let gateway = SmartctlGateway::new(GatewayConfig::from(ctx.config.as_ref()));
    let report = gateway
        .report(device)
        .await
        .with_context(|| format!("Failed to query {}", device))?;

    let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());

    println!("Device:      {}", device);
    println!("Model:       {}", text(&report.model_name));
    println!("Serial:      {}", text(&report.serial_number));
    println!("Firmware:    {}", text(&report.firmware_version));
    if let Some(capacity) = &report.user_capacity {
        println!("Capacity:    {} bytes", capacity.bytes);
    }
    match report.health_passed() {
        Some(true) => println!("Health:      PASSED"),
        Some(false) => println!("Health:      FAILED"),
        None => println!("Health:      unknown"),
    }
    if let Some(hours) = report.power_on_hours() {
        println!("Power on:    {} h", hours);
    }
    if let Some(temp) = report.temperature_celsius() {
        println!("Temperature: {} C", temp);
    }
    println!("Attributes:  {}", report.attributes().len());
    for kind in [TestKind::Short, TestKind::Long, TestKind::Conveyance] {
        if let Some(minutes) = report.expected_minutes(kind) {
            println!("{:<12} {} min", format!("{} test:", kind), minutes);
        }
    }
    if let Some(last) = report.self_test_log().first() {
        println!(
            "Last test:   {} - {}",
            last.test_type.string, last.status.string
        );
    }
    Ok(())
}

async fn run_status(ctx: &context::AppContext, device: &DevicePath, json: bool) -> Result<()> {
    let status = ctx
        .gateway()
        .query_all(device)
        .await
        .with_context(|| format!("Failed to query {}", device))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}: {} (status {})", device, status.status, status.status_code);
    if let Some(remaining) = status.remaining_percent {
        println!("  self-test running, {}% remaining", remaining);
    }
    Ok(())
}

async fn run_test(ctx: &context::AppContext, device: &DevicePath, kind: TestKind) -> Result<()> {
    let session = ctx
        .tests
        .start(device, kind)
        .await
        .with_context(|| format!("Failed to start {} test on {}", kind, device))?;

    println!("Started {} self-test on {} ({})", kind, device, session.id());

    let mut progress = session.subscribe();
    while let Some(update) = progress.next().await {
        match update {
            Ok(percent) => println!("{}%", percent),
            Err(e) => bail!("Self-test on {} did not complete: {}", device, e),
        }
    }

    let info = session.info();
    match info.passed() {
        Some(true) => println!("Test complete: passed"),
        Some(false) => bail!("Test complete: {} reported a failure", device),
        None => bail!("Test ended in state {}", info.state),
    }
    Ok(())
}

async fn run_abort(ctx: &context::AppContext, device: &DevicePath) -> Result<()> {
    ctx.tests
        .abort(device)
        .await
        .with_context(|| format!("Failed to abort self-test on {}", device))?;
    println!("Abort requested for {}", device);
    Ok(())
}
