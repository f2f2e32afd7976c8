use color_eyre::{eyre::eyre, Result};
use opends4::control::{split_w_value, HID_REPORT_TYPE_FEATURE};
use opends4::report::{AuthReport, AuthStatusReport, AUTH_PAYLOAD_SIZE};
use opends4::{
    Animation, AuthEngine, AuthStatusCode, Button, ControlDispatcher, DPadPosition, Easing,
    EmulatorConfig, InputReport, KeyMaterial, Pose, ReportPump, ReportType, Sequencer,
    StateTracker, StickSide, StickUnit, Target, TouchPoint, TransferStatus, TriggerSide,
};
use rand::RngCore;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

const COUNTER_LOG_EVERY: u64 = 250;

#[tokio::main]
async fn main() -> Result<()> {
    let log_filter = setup()?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(EmulatorConfig::default_path);
    let config = EmulatorConfig::load(&config_path).await?;
    apply_log_level(&log_filter, &config.log_level)?;
    info!("Using config {}", config_path.display());

    // Without a key the host rejects the controller, so there is nothing to run
    let key = KeyMaterial::load(&config.key_path).map_err(|e| {
        eyre!(
            "Failed to load key material from {}: {}",
            config.key_path.display(),
            e
        )
    })?;
    info!("Device serial {}", hex::encode(key.serial()));

    let auth = Arc::new(AuthEngine::new(Arc::new(key))?);
    auth.set_page_sizes(
        config.auth.challenge_page_size,
        config.auth.response_page_size,
    )?;
    let control = Arc::new(ControlDispatcher::new(
        auth.clone(),
        config.feature_configuration(),
    ));

    let tracker = Arc::new(StateTracker::new());
    let pump = Arc::new(ReportPump::new(tracker.clone()));
    let sequencer = Arc::new(Sequencer::new(
        tracker.clone(),
        config.sequencer_settings(),
    ));
    sequencer.start()?;

    let mut host = tokio::spawn(run_host_loop(pump.clone(), config.report_interval()));
    let handshake_control = control.clone();
    let handshake = tokio::spawn(async move {
        if let Err(e) = run_handshake(handshake_control).await {
            error!("Simulated auth handshake failed: {}", e);
        }
    });
    let script_sequencer = sequencer.clone();
    let imu = config.features.imu;
    let script = tokio::spawn(async move {
        if let Err(e) = run_script(script_sequencer, imu).await {
            error!("Demo script failed: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
        result = &mut host => match result {
            Ok(Ok(())) => info!("Host loop finished"),
            Ok(Err(e)) => error!("Host loop failed: {}", e),
            Err(e) => error!("Host loop panicked: {}", e),
        },
    }

    host.abort();
    handshake.abort();
    script.abort();
    sequencer.shutdown();
    info!("{} reports submitted", pump.submitted());
    Ok(())
}

type LogFilter = reload::Handle<LevelFilter, Registry>;

fn setup() -> Result<LogFilter> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(setup_logging_env())
}

fn env_log_level() -> Option<Level> {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| Level::from_str(&value).ok())
}

// Installed before the config is read so its warnings are not lost
fn setup_logging_env() -> LogFilter {
    let level = env_log_level().unwrap_or(Level::INFO);
    let (filter, handle) = reload::Layer::new(LevelFilter::from_level(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .init();
    handle
}

// RUST_LOG wins over the configured level
fn apply_log_level(filter: &LogFilter, log_level: &str) -> Result<()> {
    if env_log_level().is_some() {
        return Ok(());
    }
    match Level::from_str(log_level) {
        Ok(level) => filter
            .reload(LevelFilter::from_level(level))
            .map_err(|e| eyre!("Failed to apply log level: {}", e))?,
        Err(_) => warn!("Unknown log level '{}', keeping INFO", log_level),
    }
    Ok(())
}

// Stands in for the USB driver: completes an IN transfer every interval
async fn run_host_loop(pump: Arc<ReportPump>, period: Duration) -> Result<()> {
    info!("Starting simulated host with {} ms interval", period.as_millis());
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut report = pump.first_report();
    loop {
        ticker.tick().await;
        let submitted = pump.submitted();
        if submitted % COUNTER_LOG_EVERY == 0 {
            let decoded = InputReport::from_bytes(&report)?;
            info!(
                "Report {} submitted, counter {}",
                submitted,
                decoded.report_index()
            );
        }

        match pump.on_in_complete(TransferStatus::Completed)? {
            Some(next) => report = next,
            None => return Ok(()),
        }
    }
}

// Plays the host side of the auth handshake once through the control dispatcher
async fn run_handshake(control: Arc<ControlDispatcher>) -> Result<()> {
    // wValue of a GET_REPORT for feature report 0xf3
    let (report_type, report_id) = split_w_value(0x03f3);
    let sizes = control.get_report(report_type, report_id)?;
    let (challenge_size, response_size) = (sizes[2] as usize, sizes[3] as usize);
    debug!(challenge_size, response_size, "Host read auth page sizes");

    let mut nonce = [0u8; 0x100];
    rand::thread_rng().fill_bytes(&mut nonce);
    let seq = 1;
    for (page, chunk) in nonce.chunks(challenge_size).enumerate() {
        let mut report = AuthReport::new(ReportType::SetChallenge, seq, page as u8);
        report.data[..chunk.len()].copy_from_slice(chunk);
        report.fill_crc();
        control.set_report(
            HID_REPORT_TYPE_FEATURE,
            ReportType::SetChallenge.id(),
            &report.to_bytes(),
        )?;
    }

    loop {
        sleep(Duration::from_millis(50)).await;
        let status = control.get_report(HID_REPORT_TYPE_FEATURE, ReportType::GetAuthStatus.id())?;
        let status = AuthStatusReport::from_bytes(&status)?;
        match status.status {
            s if s == AuthStatusCode::Ready as u8 => break,
            s if s == AuthStatusCode::Pending as u8 => continue,
            s => return Err(eyre!("Handshake ended with status 0x{:02x}", s)),
        }
    }

    let pages = 0x410usize.div_ceil(response_size.clamp(1, AUTH_PAYLOAD_SIZE));
    let mut received = 0;
    for _ in 0..pages {
        let page = control.get_report(HID_REPORT_TYPE_FEATURE, ReportType::GetResponse.id())?;
        let page = AuthReport::from_bytes(&page)?;
        if !page.crc_valid() {
            warn!(page = page.page, "Response page failed CRC check");
        }
        received += response_size;
    }
    info!("Auth handshake completed, {} response bytes read", received.min(0x410));
    Ok(())
}

// A short scripted session exercising each kind of input
async fn run_script(sequencer: Arc<Sequencer>, imu: bool) -> Result<()> {
    info!("Running demo script");
    sleep(Duration::from_millis(500)).await;

    sequencer.tap(&[Target::Button(Button::Cross)])?;
    sleep(Duration::from_millis(200)).await;

    for direction in [DPadPosition::N, DPadPosition::E, DPadPosition::S, DPadPosition::W] {
        sequencer.press(&[Target::DPad(direction)], Duration::from_millis(80))?;
        sleep(Duration::from_millis(150)).await;
    }

    sequencer.tween_stick(
        StickSide::Left,
        (1.0, 0.0),
        (1.0, 360.0),
        StickUnit::Polar,
        Animation::new(Duration::from_secs(1)).then_release_after(Duration::from_millis(100)),
    )?;
    sequencer.tween_trigger(
        TriggerSide::Right,
        0.0,
        1.0,
        Animation::new(Duration::from_millis(400))
            .easing(Easing::PolyInOut(2.0))
            .then_release_after(Duration::from_millis(200)),
    )?;
    sleep(Duration::from_millis(1300)).await;

    for x in (200..=1600).step_by(350) {
        sequencer.press(&[Target::Touch(TouchPoint::new(x, 500))], Duration::from_millis(40))?;
        sleep(Duration::from_millis(60)).await;
    }

    if imu {
        let tilted = Pose {
            pitch: 30.0,
            roll: -15.0,
            ..Default::default()
        };
        sequencer.tween_attitude(
            Pose::default(),
            tilted,
            Animation::new(Duration::from_millis(500))
                .easing(Easing::PolyInOut(3.0))
                .then_release_after(Duration::from_millis(100)),
        )?;
    }

    info!("Demo script finished");
    Ok(())
}
