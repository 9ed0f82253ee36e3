//! Link-layer capture source: device discovery, auto-detection and the
//! blocking capture thread that feeds raw frames to the processing task.

use crate::packet_capture::LinkKind;
use crate::{MeterError, Result};
use async_channel::Sender;
use pcap::{Active, Capture, Device, Linktype};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Kernel-side capture buffer; generous for a single game connection.
const CAPTURE_BUF_SIZE: i32 = 10 * 1024 * 1024;

/// How long the auto-detector samples each candidate adapter.
const AUTO_DETECT_WINDOW: Duration = Duration::from_secs(3);

/// Frame queue between the capture thread and the processing task. The
/// processing side keeps up at game line rates; when it does not, newest
/// frames are dropped rather than blocking the capture handle.
pub const FRAME_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub desc: Option<String>,
    pub addr: Option<String>,
}

/// Capture devices carrying at least one IPv4 address, in pcap order.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let devices = Device::list().map_err(|e| MeterError::Capture(e.to_string()))?;
    Ok(devices
        .into_iter()
        .filter(|d| {
            d.addresses
                .iter()
                .any(|a| matches!(a.addr, std::net::IpAddr::V4(_)))
        })
        .enumerate()
        .map(|(index, d)| DeviceInfo {
            index,
            addr: d.addresses.iter().find_map(|a| match a.addr {
                std::net::IpAddr::V4(v4) => Some(v4.to_string()),
                _ => None,
            }),
            name: d.name,
            desc: d.desc,
        })
        .collect())
}

/// Pick the adapter that actually sees traffic: sample every candidate for
/// three seconds and keep the busiest. Falls back to the OS routing table
/// when the sampling window stays quiet.
pub fn auto_detect_device() -> Result<String> {
    let candidates = list_devices()?;
    if candidates.is_empty() {
        return Err(MeterError::Capture("no capture devices with an IPv4 address".into()));
    }

    log::info!("Sampling {} adapters for {:?}", candidates.len(), AUTO_DETECT_WINDOW);
    let mut counts: Vec<(String, u64)> = Vec::with_capacity(candidates.len());
    std::thread::scope(|scope| {
        let handles: Vec<_> = candidates
            .iter()
            .map(|dev| {
                let name = dev.name.clone();
                scope.spawn(move || {
                    let count = sample_device(&name);
                    (name, count)
                })
            })
            .collect();
        for handle in handles {
            if let Ok(result) = handle.join() {
                counts.push(result);
            }
        }
    });

    if let Some((name, count)) = counts.iter().max_by_key(|(_, c)| *c) {
        if *count > 0 {
            log::info!("Auto-detected device {} ({} packets)", name, count);
            return Ok(name.clone());
        }
    }

    // nothing moved during the window; trust the default route
    let fallback = Device::lookup()
        .map_err(|e| MeterError::Capture(e.to_string()))?
        .ok_or_else(|| MeterError::Capture("no default capture device".into()))?;
    log::info!("No traffic observed, falling back to default route device {}", fallback.name);
    Ok(fallback.name)
}

fn sample_device(name: &str) -> u64 {
    let mut count = 0;
    let Ok(mut cap) = open_device(name) else {
        return 0;
    };
    let deadline = Instant::now() + AUTO_DETECT_WINDOW;
    while Instant::now() < deadline {
        match cap.next_packet() {
            Ok(_) => count += 1,
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(_) => break,
        }
    }
    count
}

/// Open a device the way the meter captures: promiscuous, full snaplen,
/// 10 MiB kernel buffer, "ip and tcp" BPF filter, 1-second read timeout so
/// the capture loop can observe the shutdown flag.
pub fn open_device(name: &str) -> Result<Capture<Active>> {
    let device = Device::list()
        .map_err(|e| MeterError::Capture(e.to_string()))?
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| MeterError::DeviceNotFound(name.to_string()))?;

    let mut cap = Capture::from_device(device)
        .map_err(|e| MeterError::Capture(e.to_string()))?
        .promisc(true)
        .snaplen(65535)
        .buffer_size(CAPTURE_BUF_SIZE)
        .timeout(1000)
        .open()
        .map_err(|e| MeterError::Capture(e.to_string()))?;

    cap.filter("ip and tcp", true)
        .map_err(|e| MeterError::Capture(e.to_string()))?;
    Ok(cap)
}

pub fn link_kind(linktype: Linktype) -> LinkKind {
    match linktype {
        // DLT_EN10MB
        Linktype(1) => LinkKind::Ethernet,
        // DLT_NULL / BSD loopback
        Linktype(0) => LinkKind::Null,
        // DLT_LINUX_SLL
        Linktype(113) => LinkKind::LinuxSll,
        _ => LinkKind::Unsupported,
    }
}

/// Spawn the blocking capture thread. Frames are pushed onto the bounded
/// queue; a full queue drops the newest frame.
pub fn start_capture(
    device_name: &str,
    tx: Sender<(LinkKind, Vec<u8>)>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let mut cap = open_device(device_name)?;
    let linktype = cap.get_datalink();
    let kind = link_kind(linktype);
    if kind == LinkKind::Unsupported {
        log::error!(
            "Unsupported link type {:?} on {}; captured frames will not decode",
            linktype,
            device_name
        );
    }
    log::info!("Capture started on {} (link type {:?})", device_name, linktype);

    let handle = std::thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                match cap.next_packet() {
                    Ok(packet) => match tx.try_send((kind, packet.data.to_vec())) {
                        Ok(()) => {}
                        Err(async_channel::TrySendError::Full(_)) => {
                            log::debug!("Frame queue full, dropping {}-byte frame", packet.data.len());
                        }
                        Err(async_channel::TrySendError::Closed(_)) => break,
                    },
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(e) => {
                        log::error!("Capture read failed: {}", e);
                        break;
                    }
                }
            }
            log::info!("Capture thread exiting");
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_kind_maps_the_supported_dlts() {
        assert_eq!(link_kind(Linktype(1)), LinkKind::Ethernet);
        assert_eq!(link_kind(Linktype(0)), LinkKind::Null);
        assert_eq!(link_kind(Linktype(113)), LinkKind::LinuxSll);
        assert_eq!(link_kind(Linktype(105)), LinkKind::Unsupported);
    }
}
