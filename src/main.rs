use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resonance_meter::{
    capture,
    config::{self, AppArgs},
    data_manager::DataManager,
    packet_capture::PacketProcessor,
    packet_parser::LoggingDecoder,
    web_server::WebServer,
    MeterError, Result, VERSION,
};

#[tokio::main]
async fn main() {
    let args = AppArgs::parse();

    let log_level = match args.valid_log_level() {
        Some(level) => level.to_string(),
        None => config::prompt_log_level(),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level)).init();

    log::info!("Starting Resonance Meter v{}", VERSION);

    let data_manager = Arc::new(DataManager::new("."));
    if let Err(e) = data_manager.initialize() {
        log::error!("Initialisation error, continuing with defaults: {}", e);
    }
    data_manager.spawn_cache_saver();

    let device = match select_device(&args) {
        Ok(device) => device,
        Err(e) => {
            log::error!("Device selection failed: {}", e);
            std::process::exit(1);
        }
    };

    let (frame_tx, frame_rx) = async_channel::bounded(capture::FRAME_QUEUE_CAPACITY);
    let capture_stop = Arc::new(AtomicBool::new(false));
    let capture_handle = match capture::start_capture(&device, frame_tx, capture_stop.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("Failed to open capture on {}: {}", device, e);
            std::process::exit(1);
        }
    };

    let processor = Arc::new(parking_lot::Mutex::new(PacketProcessor::new(
        data_manager.clone(),
        Box::new(LoggingDecoder),
    )));

    // processing task: drains the frame queue, owns the flow mutex per frame
    let processing = processor.clone();
    tokio::spawn(async move {
        while let Ok((link, frame)) = frame_rx.recv().await {
            if let Err(e) = processing.lock().handle_frame(link, &frame) {
                log::error!("{}", e);
                if matches!(e, MeterError::FrameCorruption(_)) {
                    // a misaligned stream never recovers; restart clean
                    std::process::exit(1);
                }
            }
        }
    });

    // realtime ticker: sliding-window rates + idle-clear check
    let dm = data_manager.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;
            dm.update_realtime();
            dm.check_timeout_clear_at(resonance_meter::now_ms());
        }
    });

    // maintenance ticker: auto-save, fragment sweep, flow stall detection
    let dm = data_manager.clone();
    let maintenance = processor.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            maintenance.lock().maintenance();
            dm.maintenance_tick();
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = WebServer::new(data_manager.clone());
    tokio::spawn(async move {
        if let Err(e) = server
            .run(async {
                let _ = shutdown_rx.await;
            })
            .await
        {
            log::error!("Web server failed: {}", e);
        }
    });

    wait_for_shutdown_signal().await;
    log::info!("Shutting down");

    capture_stop.store(true, Ordering::SeqCst);
    let _ = shutdown_tx.send(());
    data_manager.flush_on_shutdown();
    let _ = capture_handle.join();

    log::info!("Shutdown complete");
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Resolve the capture device from the CLI argument, falling back to the
/// interactive menu and finally to traffic-based auto-detection.
fn select_device(args: &AppArgs) -> Result<String> {
    let devices = capture::list_devices()?;
    if devices.is_empty() {
        return Err(MeterError::Capture("no capture devices with an IPv4 address".into()));
    }

    if let Some(arg) = &args.device {
        if arg == "auto" {
            return capture::auto_detect_device();
        }
        if let Ok(index) = arg.parse::<usize>() {
            if let Some(device) = devices.get(index) {
                return Ok(device.name.clone());
            }
        }
        log::warn!("Invalid device argument '{}', falling back to prompt", arg);
    }

    println!("Available capture devices:");
    for device in &devices {
        println!(
            "  [{}] {}{}{}",
            device.index,
            device.name,
            device
                .desc
                .as_deref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default(),
            device
                .addr
                .as_deref()
                .map(|a| format!(" - {}", a))
                .unwrap_or_default(),
        );
    }

    match config::prompt_device_index(devices.len()) {
        Some(index) => Ok(devices[index].name.clone()),
        None => capture::auto_detect_device(),
    }
}
