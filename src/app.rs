use crate::config::Config;
use crate::ndn::face::Face;
use crate::ndn::name::Name;
use crate::ndn::udp::{self, UdpFaceConfig};
use crate::ndn::KeyChain;
use crate::torrent::manager::TorrentManager;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::signal;

pub async fn run(config: Config) -> Result<()> {
    let torrent_name = Name::from_uri(&config.torrent.name)
        .context("torrent.name must be the URI of the torrent file's initial segment")?;
    let prefixes: Vec<Name> = config
        .torrent
        .routable_prefixes
        .iter()
        .map(|p| Name::from_uri(p).with_context(|| format!("routable prefix '{p}'")))
        .collect::<Result<_>>()?;
    if prefixes.is_empty() {
        tracing::warn!("no routable prefixes configured; interests go out unprefixed");
    }

    let mut key_chain = KeyChain::new();
    if !config.torrent.trusted_keys_path.is_empty() {
        let loaded = key_chain.load_anchors(Path::new(&config.torrent.trusted_keys_path))?;
        tracing::info!(anchors = loaded, "trust anchors loaded");
    }

    let (face, driver) = Face::pair();
    let face_task = tokio::spawn(udp::run_udp_face(
        driver,
        UdpFaceConfig {
            forwarder_host: config.face.forwarder_host.clone(),
            forwarder_port: config.face.forwarder_port,
            interest_lifetime: Duration::from_millis(config.face.interest_lifetime_ms),
        },
    ));

    let mut manager = TorrentManager::new(
        torrent_name,
        config.general.data_dir.clone(),
        config.torrent.seed,
        face,
        key_chain,
        &prefixes,
    );
    manager.initialize().await.context("initializing from data dir")?;

    let torrent_dir = crate::torrent::store::torrent_dir(Path::new(&config.general.data_dir));
    manager.download_torrent_file(
        torrent_dir,
        Box::new(|manifests| {
            tracing::info!(manifests = manifests.len(), "torrent file complete");
        }),
        Box::new(|name, error| {
            tracing::error!(segment = %name, error = %error, "torrent download failed");
        }),
    );

    tracing::info!("node running; press Ctrl+C to stop");
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::warn!("received Ctrl+C");
        }
        _ = manager.process_events(Duration::ZERO) => {
            tracing::warn!("transport closed");
        }
    }

    manager.shutdown().await;
    face_task.abort();
    tracing::info!("shut down gracefully");
    Ok(())
}
