use crate::ndn::face::{FaceDriver, FaceEvent, FaceRequest};
use crate::ndn::name::Name;
use crate::ndn::packet::{Data, Interest};
use crate::ndn::tlv::{TLV_DATA, TLV_INTEREST};
use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 8800;
const TIMEOUT_TICK: Duration = Duration::from_millis(200);

pub const DEFAULT_INTEREST_LIFETIME: Duration = Duration::from_secs(4);

#[derive(Debug, Clone)]
pub struct UdpFaceConfig {
    pub forwarder_host: String,
    pub forwarder_port: u16,
    pub interest_lifetime: Duration,
}

struct PendingInterest {
    name: Name,
    deadline: Instant,
}

/// Drive a face pair over a UDP link to an NDN forwarder.
///
/// Prefix registration is a forwarder-management concern this link does not
/// speak; registrations are accepted and logged so a connected forwarder
/// that floods interests still reaches the serving side.
pub async fn run_udp_face(mut driver: FaceDriver, cfg: UdpFaceConfig) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("binding UDP face socket")?;
    socket
        .connect((cfg.forwarder_host.as_str(), cfg.forwarder_port))
        .await
        .with_context(|| {
            format!(
                "connecting UDP face to {}:{}",
                cfg.forwarder_host, cfg.forwarder_port
            )
        })?;
    tracing::info!(
        forwarder = %format!("{}:{}", cfg.forwarder_host, cfg.forwarder_port),
        "udp face up"
    );

    let mut pending: Vec<PendingInterest> = Vec::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut tick = tokio::time::interval(TIMEOUT_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            req = driver.requests.recv() => {
                let Some(req) = req else { break; };
                match req {
                    FaceRequest::ExpressInterest(mut interest) => {
                        let lifetime = interest.lifetime.unwrap_or(cfg.interest_lifetime);
                        interest.lifetime = Some(lifetime);
                        pending.push(PendingInterest {
                            name: interest.name.clone(),
                            deadline: Instant::now() + lifetime,
                        });
                        if let Err(error) = socket.send(&interest.encode()).await {
                            tracing::warn!(name = %interest.name, error = %error, "interest send failed");
                        }
                    }
                    FaceRequest::PutData(data) => {
                        if let Err(error) = socket.send(&data.encode()).await {
                            tracing::warn!(name = %data.name, error = %error, "data send failed");
                        }
                    }
                    FaceRequest::RegisterPrefix(prefix) => {
                        tracing::debug!(prefix = %prefix, "prefix registered on udp face");
                    }
                    FaceRequest::UnregisterPrefix(prefix) => {
                        tracing::debug!(prefix = %prefix, "prefix unregistered on udp face");
                    }
                    FaceRequest::Shutdown => break,
                }
            }
            received = socket.recv(&mut buf) => {
                let n = match received {
                    Ok(n) => n,
                    Err(error) => {
                        tracing::warn!(error = %error, "udp face receive failed");
                        continue;
                    }
                };
                handle_datagram(&buf[..n], &mut pending, &driver);
            }
            _ = tick.tick() => {
                let now = Instant::now();
                let mut i = 0;
                while i < pending.len() {
                    if pending[i].deadline <= now {
                        let expired = pending.swap_remove(i);
                        let _ = driver.events.send(FaceEvent::InterestTimeout(expired.name));
                    } else {
                        i += 1;
                    }
                }
            }
        }
    }

    tracing::info!("udp face down");
    Ok(())
}

fn handle_datagram(bytes: &[u8], pending: &mut Vec<PendingInterest>, driver: &FaceDriver) {
    let Some(first) = bytes.first() else { return };
    match u64::from(*first) {
        TLV_DATA => match Data::decode(bytes) {
            Ok(data) => {
                pending.retain(|p| !Interest::new(p.name.clone()).matches(&data));
                let _ = driver.events.send(FaceEvent::Data(data));
            }
            Err(error) => tracing::debug!(error = %error, "undecodable data datagram"),
        },
        TLV_INTEREST => match Interest::decode(bytes) {
            Ok(interest) => {
                let _ = driver.events.send(FaceEvent::Interest(interest));
            }
            Err(error) => tracing::debug!(error = %error, "undecodable interest datagram"),
        },
        other => tracing::debug!(first = other, "unknown datagram type"),
    }
}
