use crate::ndn::KeyChain;
use crate::ndn::face::{Face, FaceEvent};
use crate::ndn::name::Name;
use crate::ndn::packet::{Data, Interest};
use crate::torrent::errors::{FetchError, StoreError};
use crate::torrent::file::TorrentFileSegment;
use crate::torrent::manifest::FileManifestSegment;
use crate::torrent::queue::{InterestQueue, Priority, QueuedInterest};
use crate::torrent::stats::StatsTable;
use crate::torrent::store::{self, FileState};
use crate::torrent::{DATA_MARKER, MANIFEST_MARKER, TORRENT_FILE_MARKER};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

// Number of times to retry before rotating to the next routable prefix.
pub const MAX_NUM_OF_RETRIES: u32 = 5;
// Number of interests to send between stats-table sorts.
pub const SORTING_INTERVAL: u64 = 100;
// Maximum number of outstanding interests.
pub const WINDOW_SIZE: usize = 50;

pub type PacketReceivedCallback = Box<dyn FnOnce(&Name) + Send>;
pub type ManifestReceivedCallback = Box<dyn FnOnce(Vec<Name>) + Send>;
pub type TorrentFileReceivedCallback = Box<dyn FnOnce(Vec<Name>) + Send>;
pub type FailedCallback = Box<dyn FnOnce(&Name, &FetchError) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    TorrentSegment,
    ManifestSegment,
    DataPacket,
}

fn classify(name: &Name) -> Option<ObjectKind> {
    let stripped = name.strip_digest();
    let marker = stripped.get(stripped.len().checked_sub(2)?)?;
    if marker.value() == TORRENT_FILE_MARKER {
        Some(ObjectKind::TorrentSegment)
    } else if marker.value() == MANIFEST_MARKER {
        Some(ObjectKind::ManifestSegment)
    } else if marker.value() == DATA_MARKER {
        Some(ObjectKind::DataPacket)
    } else {
        None
    }
}

/// Deterministic reconstruction of a data packet from its name and payload.
/// The digest signature makes the wire bytes, and therefore the implicit
/// digest, a pure function of the two.
fn packet_from_payload(name: Name, payload: Vec<u8>) -> Data {
    let mut data = Data::unsigned(name, payload);
    KeyChain::sign_digest(&mut data);
    data
}

struct PendingEntry {
    logical: Name,
    prefixed: Name,
}

struct RetryState {
    retries: u32,
    prefixes_tried: usize,
    priority: Priority,
    last_error: FetchError,
}

struct TorrentDownload {
    dir: PathBuf,
    on_success: Option<TorrentFileReceivedCallback>,
    on_failed: Option<FailedCallback>,
}

struct ManifestDownload {
    dir: PathBuf,
    on_success: Option<ManifestReceivedCallback>,
    on_failed: Option<FailedCallback>,
}

struct PacketDownload {
    on_success: Option<PacketReceivedCallback>,
    on_failed: Option<FailedCallback>,
}

#[derive(Debug, Clone)]
struct PacketSlot {
    chain: Name,
    index: usize,
    digest: [u8; 32],
}

/// The torrent node core: tracks obtained objects across the three catalog
/// levels, drives the windowed prefix-rotating request pipeline, validates
/// and materializes arriving data, and answers peers for what it holds.
///
/// All operations other than `new` assume `initialize` has completed.
pub struct TorrentManager {
    torrent_name: Name,
    torrent_chain: Name,
    root_prefix: Name,
    data_dir: PathBuf,
    seed_flag: bool,
    face: Face,
    key_chain: KeyChain,

    stats: StatsTable,
    queue: InterestQueue,
    pending: HashMap<Name, PendingEntry>,
    sent_index: HashMap<Name, Name>,
    retry: HashMap<Name, RetryState>,
    queued: HashSet<Name>,
    sorting_counter: u64,

    torrent_segments: Vec<TorrentFileSegment>,
    manifest_chains: BTreeMap<Name, Vec<FileManifestSegment>>,
    served_segments: HashMap<Name, Data>,
    file_states: HashMap<Name, FileState>,
    packet_index: HashMap<Name, PacketSlot>,
    registered_prefixes: Vec<Name>,

    torrent_op: Option<TorrentDownload>,
    manifest_ops: HashMap<Name, ManifestDownload>,
    packet_ops: HashMap<Name, PacketDownload>,

    initialized: bool,
    stopped: bool,
}

impl TorrentManager {
    /// No I/O happens here; call `initialize` before anything else.
    pub fn new(
        torrent_name: Name,
        data_dir: impl Into<PathBuf>,
        seed: bool,
        face: Face,
        key_chain: KeyChain,
        routable_prefixes: &[Name],
    ) -> Self {
        let torrent_chain = torrent_name.chain_prefix();
        let root_prefix = if torrent_chain
            .components()
            .last()
            .is_some_and(|c| c.value() == TORRENT_FILE_MARKER)
        {
            torrent_chain.prefix(torrent_chain.len() - 1)
        } else {
            torrent_chain.clone()
        };
        let mut stats = StatsTable::new();
        for prefix in routable_prefixes {
            stats.insert(prefix.clone());
        }
        Self {
            torrent_name,
            torrent_chain,
            root_prefix,
            data_dir: data_dir.into(),
            seed_flag: seed,
            face,
            key_chain,
            stats,
            queue: InterestQueue::default(),
            pending: HashMap::new(),
            sent_index: HashMap::new(),
            retry: HashMap::new(),
            queued: HashSet::new(),
            sorting_counter: 0,
            torrent_segments: Vec::new(),
            manifest_chains: BTreeMap::new(),
            served_segments: HashMap::new(),
            file_states: HashMap::new(),
            packet_index: HashMap::new(),
            registered_prefixes: Vec::new(),
            torrent_op: None,
            manifest_ops: HashMap::new(),
            packet_ops: HashMap::new(),
            initialized: false,
            stopped: false,
        }
    }

    /// Rebuild all state from the data directory and register serving
    /// prefixes. Idempotent; fails only on unrecoverable I/O. Malformed
    /// on-disk objects are skipped with a warning.
    pub async fn initialize(&mut self) -> Result<(), StoreError> {
        self.reset().await;
        store::ensure_layout(&self.data_dir).await?;

        let torrent_dir = store::torrent_dir(&self.data_dir);
        for (file_index, bytes) in store::scan_torrent_segments(&torrent_dir).await? {
            if let Err(reason) = self.restore_torrent_segment(file_index, &bytes) {
                tracing::warn!(index = file_index, %reason, "skipping invalid torrent segment");
            }
        }

        let manifests_dir = store::manifests_dir(&self.data_dir);
        for scanned in store::scan_manifest_segments(&manifests_dir).await? {
            if let Err(reason) =
                self.restore_manifest_segment(&scanned.rel_path, scanned.index, &scanned.bytes)
            {
                tracing::warn!(
                    rel_path = %scanned.rel_path,
                    index = scanned.index,
                    %reason,
                    "skipping invalid manifest segment"
                );
            }
        }

        let complete: Vec<Name> = self
            .manifest_chains
            .iter()
            .filter(|(_, segs)| segs.last().is_some_and(|s| s.next().is_none()))
            .map(|(chain, _)| chain.clone())
            .collect();
        for chain in complete {
            if let Err(error) = self.restore_file_state(&chain).await {
                tracing::warn!(chain = %chain, error = %error, "failed to rebuild file state");
            }
        }

        self.register(self.torrent_chain.clone());
        let partially_present: Vec<Name> = self
            .file_states
            .iter()
            .filter(|(_, fs)| fs.bitmap().iter().any(|b| *b))
            .map(|(chain, _)| serving_prefix(chain))
            .collect();
        for prefix in partially_present {
            self.register(prefix);
        }

        self.initialized = true;
        self.stopped = false;
        tracing::info!(
            torrent = %self.torrent_name,
            segments = self.torrent_segments.len(),
            manifests = self.manifest_chains.len(),
            files = self.file_states.len(),
            "initialized from disk"
        );
        Ok(())
    }

    /// True iff the chain of torrent segments is complete.
    pub fn has_all_torrent_segments(&self) -> bool {
        self.find_torrent_file_segment_to_download().is_none()
    }

    /// True iff the packet's bit is set in the owning file's bitmap.
    pub fn has_data_packet(&self, name: &Name) -> bool {
        let stripped = name.strip_digest();
        let Some(slot) = self.packet_index.get(&stripped) else {
            return false;
        };
        if name.terminal_digest().is_some_and(|d| d != slot.digest) {
            return false;
        }
        self.file_states
            .get(&slot.chain)
            .is_some_and(|fs| fs.has(slot.index))
    }

    /// The lowest-indexed missing torrent segment; the root name when nothing
    /// is known; `None` when the chain is complete.
    pub fn find_torrent_file_segment_to_download(&self) -> Option<Name> {
        match self.torrent_segments.last() {
            None => Some(self.torrent_name.clone()),
            Some(last) => last.next().cloned(),
        }
    }

    /// The lowest-indexed missing segment of the manifest chain that
    /// `manifest_name` belongs to; `None` when the chain is complete.
    pub fn find_manifest_segment_to_download(&self, manifest_name: &Name) -> Option<Name> {
        let chain = manifest_name.chain_prefix();
        match self.manifest_chains.get(&chain) {
            Some(segs) if !segs.is_empty() => segs.last().and_then(|s| s.next().cloned()),
            _ => {
                // Nothing known yet; prefer the digest-qualified catalog entry.
                for seg in &self.torrent_segments {
                    for entry in seg.catalog() {
                        if entry.chain_prefix() == chain {
                            return Some(entry.clone());
                        }
                    }
                }
                Some(chain.with_segment(0))
            }
        }
    }

    /// For every referenced manifest whose chain is incomplete, append the
    /// next missing segment name.
    pub fn find_file_manifests_to_download(&self, out: &mut Vec<Name>) {
        let mut seen = HashSet::new();
        for seg in &self.torrent_segments {
            for entry in seg.catalog() {
                let chain = entry.chain_prefix();
                if !seen.insert(chain.clone()) {
                    continue;
                }
                if let Some(next) = self.find_manifest_segment_to_download(entry) {
                    out.push(next);
                }
            }
        }
    }

    /// Append all missing packet names of the entire file owned by
    /// `manifest_name`'s chain, in ascending packet order.
    pub fn find_data_packets_to_download(&self, manifest_name: &Name, out: &mut Vec<Name>) {
        let chain = manifest_name.chain_prefix();
        if let Some(fs) = self.file_states.get(&chain) {
            for index in fs.missing_indices() {
                out.push(fs.packets()[index].clone());
            }
            return;
        }
        if let Some(segs) = self.manifest_chains.get(&chain) {
            for seg in segs {
                for packet in seg.packets() {
                    if !self.has_data_packet(packet) {
                        out.push(packet.clone());
                    }
                }
            }
        }
    }

    /// The union of missing packets across every known manifest chain.
    pub fn find_all_missing_data_packets(&self, out: &mut Vec<Name>) {
        let chains: Vec<Name> = self.manifest_chains.keys().cloned().collect();
        for chain in chains {
            self.find_data_packets_to_download(&chain, out);
        }
    }

    /// Non-blocking download of the whole torrent-file chain. `on_success`
    /// receives the first-segment manifest names the torrent references.
    pub fn download_torrent_file(
        &mut self,
        path: impl Into<PathBuf>,
        on_success: TorrentFileReceivedCallback,
        on_failed: FailedCallback,
    ) {
        if self.has_all_torrent_segments() {
            on_success(self.all_manifest_entries());
            return;
        }
        self.torrent_op = Some(TorrentDownload {
            dir: path.into(),
            on_success: Some(on_success),
            on_failed: Some(on_failed),
        });
        if let Some(next) = self.find_torrent_file_segment_to_download() {
            self.enqueue_request(next, Priority::Catalog);
        }
        self.send_interests();
    }

    /// Non-blocking download of one file-manifest chain. `on_success`
    /// receives the complete list of data-packet names.
    pub fn download_file_manifest(
        &mut self,
        manifest_name: Name,
        path: impl Into<PathBuf>,
        on_success: ManifestReceivedCallback,
        on_failed: FailedCallback,
    ) {
        let chain = manifest_name.chain_prefix();
        if let Some(packets) = self.complete_chain_packets(&chain) {
            on_success(packets);
            return;
        }
        self.manifest_ops.insert(
            chain,
            ManifestDownload {
                dir: path.into(),
                on_success: Some(on_success),
                on_failed: Some(on_failed),
            },
        );
        if let Some(next) = self.find_manifest_segment_to_download(&manifest_name) {
            self.enqueue_request(next, Priority::Catalog);
        }
        self.send_interests();
    }

    /// Non-blocking download of one data packet.
    pub fn download_data_packet(
        &mut self,
        packet_name: Name,
        on_success: PacketReceivedCallback,
        on_failed: FailedCallback,
    ) {
        if self.has_data_packet(&packet_name) {
            on_success(&packet_name);
            return;
        }
        self.packet_ops.insert(
            packet_name.clone(),
            PacketDownload {
                on_success: Some(on_success),
                on_failed: Some(on_failed),
            },
        );
        self.enqueue_request(packet_name, Priority::Data);
        self.send_interests();
    }

    /// Hand a previously validated packet to the face for publication.
    pub fn seed(&self, data: &Data) {
        self.face.put(data.clone());
    }

    /// Advance the transport: dispatch inbound events and keep the outbound
    /// window full, until `timeout` elapses. A zero timeout blocks until
    /// shutdown or transport loss.
    pub async fn process_events(&mut self, timeout: Duration) {
        self.send_interests();
        if timeout.is_zero() {
            while !self.stopped {
                let Some(event) = self.face.next_event().await else {
                    break;
                };
                self.dispatch(event).await;
                self.send_interests();
            }
            return;
        }
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.stopped {
            tokio::select! {
                event = self.face.next_event() => {
                    let Some(event) = event else { break };
                    self.dispatch(event).await;
                    self.send_interests();
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
    }

    /// Abandon every in-flight transaction (no callbacks fire), close file
    /// handles, deregister prefixes, and stop the face.
    pub async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let abandoned = self.pending.len() + self.queue.len();
        self.pending.clear();
        self.sent_index.clear();
        self.retry.clear();
        self.queued.clear();
        self.queue.clear();
        self.torrent_op = None;
        self.manifest_ops.clear();
        self.packet_ops.clear();
        for (_, fs) in std::mem::take(&mut self.file_states) {
            fs.close().await;
        }
        for prefix in self.registered_prefixes.drain(..) {
            self.face.unregister_prefix(prefix);
        }
        self.face.shutdown();
        tracing::debug!(abandoned, "manager shut down");
    }

    async fn dispatch(&mut self, event: FaceEvent) {
        match event {
            FaceEvent::Data(data) => self.on_data(data).await,
            FaceEvent::Interest(interest) => self.on_interest(interest).await,
            FaceEvent::InterestTimeout(name) => self.on_timeout(name),
        }
    }

    // ---- outbound pump ----

    fn enqueue_request(&mut self, name: Name, priority: Priority) {
        if self.stopped {
            return;
        }
        let key = name.strip_digest();
        if self.pending.contains_key(&key) || self.queued.contains(&name) {
            return;
        }
        if self.served_segments.contains_key(&key) || self.has_data_packet(&name) {
            return;
        }
        self.retry.entry(name.clone()).or_insert(RetryState {
            retries: 0,
            prefixes_tried: 0,
            priority,
            last_error: FetchError::Timeout,
        });
        let accepted = self.queue.enqueue(QueuedInterest {
            name: name.clone(),
            priority,
            hint: None,
        });
        if accepted {
            self.queued.insert(name);
        } else {
            self.retry.remove(&name);
            tracing::warn!(name = %name, "interest queue full, dropping request");
        }
    }

    fn send_interests(&mut self) {
        if !self.initialized || self.stopped {
            return;
        }
        while self.pending.len() < WINDOW_SIZE {
            let batch = self.queue.dequeue_batch(WINDOW_SIZE - self.pending.len());
            if batch.is_empty() {
                break;
            }
            for request in batch {
                self.queued.remove(&request.name);
                let key = request.name.strip_digest();
                if self.pending.contains_key(&key) {
                    continue;
                }
                let prefixed = match self.stats.current_prefix() {
                    Some(prefix) => prefix.join(&request.name),
                    None => request.name.clone(),
                };
                let hint = request.hint.unwrap_or_else(|| self.stats.alternates());
                self.face
                    .express_interest(Interest::new(prefixed.clone()).with_hint(hint));
                self.sent_index.insert(prefixed.clone(), key.clone());
                self.pending.insert(
                    key,
                    PendingEntry {
                        logical: request.name,
                        prefixed,
                    },
                );
                self.sorting_counter += 1;
                if self.sorting_counter % SORTING_INTERVAL == 0 {
                    self.stats.sort();
                }
            }
        }
    }

    // ---- retry ladder ----

    fn on_timeout(&mut self, interest_name: Name) {
        if self.stopped {
            return;
        }
        let Some(key) = self.sent_index.remove(&interest_name) else {
            return;
        };
        let Some(entry) = self.pending.remove(&key) else {
            return;
        };
        self.on_failure(entry.logical, FetchError::Timeout);
    }

    fn on_failure(&mut self, logical: Name, error: FetchError) {
        if self.stopped {
            return;
        }
        if !error.is_retriable() {
            self.terminal_failure(logical, error);
            return;
        }
        let table_len = self.stats.len().max(1);
        let (terminal, rotated, priority, last_error) = {
            let Some(state) = self.retry.get_mut(&logical) else {
                tracing::debug!(name = %logical, "failure for unknown request");
                return;
            };
            state.last_error = error;
            state.retries += 1;
            let mut rotated = false;
            let mut terminal = false;
            if state.retries >= MAX_NUM_OF_RETRIES {
                state.retries = 0;
                state.prefixes_tried += 1;
                rotated = true;
                terminal = state.prefixes_tried >= table_len;
            }
            (terminal, rotated, state.priority, state.last_error.clone())
        };
        if let Some(prefix) = self.stats.current_prefix().cloned() {
            self.stats.record_failure(&prefix);
        }
        if rotated {
            self.stats.advance_cursor();
        }
        if terminal {
            self.terminal_failure(logical, last_error);
            return;
        }
        if self.queued.contains(&logical) {
            return;
        }
        let accepted = self.queue.enqueue(QueuedInterest {
            name: logical.clone(),
            priority,
            hint: None,
        });
        if accepted {
            self.queued.insert(logical);
        } else {
            tracing::warn!(name = %logical, "interest queue full during retry");
            let error = self
                .retry
                .get(&logical)
                .map(|s| s.last_error.clone())
                .unwrap_or(FetchError::Timeout);
            self.terminal_failure(logical, error);
        }
    }

    fn terminal_failure(&mut self, logical: Name, error: FetchError) {
        self.retry.remove(&logical);
        tracing::warn!(name = %logical, error = %error, "request terminally failed");
        match classify(&logical) {
            Some(ObjectKind::TorrentSegment) => {
                if let Some(mut op) = self.torrent_op.take() {
                    if let Some(on_failed) = op.on_failed.take() {
                        on_failed(&logical, &error);
                    }
                }
            }
            Some(ObjectKind::ManifestSegment) => {
                let chain = logical.chain_prefix();
                if let Some(mut op) = self.manifest_ops.remove(&chain) {
                    if let Some(on_failed) = op.on_failed.take() {
                        on_failed(&logical, &error);
                    }
                }
            }
            Some(ObjectKind::DataPacket) | None => {
                if let Some(mut op) = self.packet_ops.remove(&logical) {
                    if let Some(on_failed) = op.on_failed.take() {
                        on_failed(&logical, &error);
                    }
                }
            }
        }
    }

    // ---- inbound data ----

    async fn on_data(&mut self, data: Data) {
        if self.stopped {
            return;
        }
        let Some(entry) = self.pending.remove(&data.name) else {
            tracing::trace!(name = %data.name, "late or unsolicited data");
            return;
        };
        self.sent_index.remove(&entry.prefixed);
        let logical = entry.logical;
        let Some(kind) = classify(&logical) else {
            tracing::debug!(name = %logical, "unclassifiable request name");
            self.retry.remove(&logical);
            return;
        };

        if let Some(expected) = logical.terminal_digest() {
            if data.implicit_digest() != expected {
                self.on_failure(logical, FetchError::DigestMismatch);
                return;
            }
        }
        if !self.key_chain.verify(&data) {
            self.on_failure(logical, FetchError::SignatureInvalid);
            return;
        }

        let outcome = match kind {
            ObjectKind::TorrentSegment => self.accept_torrent_segment(&data).await,
            ObjectKind::ManifestSegment => self.accept_manifest_segment(&data).await,
            ObjectKind::DataPacket => self.accept_data_packet(&data).await,
        };
        match outcome {
            Ok(newly_validated) => {
                if newly_validated {
                    if let Some(prefix) = self.stats.current_prefix().cloned() {
                        self.stats.record_success(&prefix);
                    }
                }
                self.retry.remove(&logical);
            }
            Err(error) => self.on_failure(logical, error),
        }
    }

    async fn accept_torrent_segment(&mut self, data: &Data) -> Result<bool, FetchError> {
        let segment =
            TorrentFileSegment::from_data(data).map_err(|e| FetchError::Decode(e.to_string()))?;
        if segment.chain() != self.torrent_chain {
            return Err(FetchError::NotInCatalog);
        }
        let expected_index = self.torrent_segments.len() as u64;
        if segment.segment_index() != expected_index {
            if self
                .served_segments
                .contains_key(&data.name)
            {
                return Ok(false);
            }
            return Err(FetchError::NotInCatalog);
        }
        if let Some(previous) = self.torrent_segments.last() {
            if previous.next() != Some(&data.full_name()) {
                return Err(FetchError::NotInCatalog);
            }
        }

        let dir = self
            .torrent_op
            .as_ref()
            .map(|op| op.dir.clone())
            .unwrap_or_else(|| store::torrent_dir(&self.data_dir));
        self.write_torrent_segment(data, &dir, expected_index)
            .await?;

        let next = segment.next().cloned();
        let newly_discovered: Vec<Name> = segment
            .catalog()
            .iter()
            .filter(|entry| !self.manifest_chains.contains_key(&entry.chain_prefix()))
            .cloned()
            .collect();
        self.served_segments.insert(data.name.clone(), data.clone());
        self.torrent_segments.push(segment);
        tracing::debug!(index = expected_index, "torrent segment accepted");

        match next {
            Some(next) => self.enqueue_request(next, Priority::Catalog),
            None => {
                let entries = self.all_manifest_entries();
                if let Some(mut op) = self.torrent_op.take() {
                    if let Some(on_success) = op.on_success.take() {
                        on_success(entries);
                    }
                }
            }
        }
        for entry in newly_discovered {
            self.enqueue_request(entry, Priority::Catalog);
        }
        Ok(true)
    }

    async fn accept_manifest_segment(&mut self, data: &Data) -> Result<bool, FetchError> {
        let segment =
            FileManifestSegment::from_data(data).map_err(|e| FetchError::Decode(e.to_string()))?;
        let chain = segment.chain();
        let known = self.manifest_chains.get(&chain).map_or(0, Vec::len);
        if segment.segment_index() != known as u64 {
            if self.served_segments.contains_key(&data.name) {
                return Ok(false);
            }
            return Err(FetchError::NotInCatalog);
        }

        let full_name = data.full_name();
        if known == 0 {
            let listed = self
                .torrent_segments
                .iter()
                .flat_map(|seg| seg.catalog())
                .any(|entry| *entry == full_name);
            if !listed {
                return Err(FetchError::NotInCatalog);
            }
        } else {
            let previous = &self.manifest_chains[&chain][known - 1];
            if previous.next() != Some(&full_name) {
                return Err(FetchError::NotInCatalog);
            }
            if previous.file_path() != segment.file_path()
                || previous.file_length() != segment.file_length()
                || previous.data_packet_size() != segment.data_packet_size()
                || previous.sub_manifest_size() != segment.sub_manifest_size()
            {
                return Err(FetchError::Decode(
                    "manifest chain parameters changed between segments".to_string(),
                ));
            }
        }

        let is_terminal = segment.next().is_none();
        if is_terminal {
            let total = self
                .manifest_chains
                .get(&chain)
                .map_or(0, |segs| segs.iter().map(|s| s.packets().len()).sum::<usize>())
                + segment.packets().len();
            if total as u64 != segment.expected_packet_count() {
                return Err(FetchError::Decode(format!(
                    "manifest chain lists {total} packets, file length implies {}",
                    segment.expected_packet_count()
                )));
            }
        }

        let dir = self
            .manifest_ops
            .get(&chain)
            .map(|op| op.dir.clone())
            .unwrap_or_else(|| store::manifests_dir(&self.data_dir));
        let path =
            store::manifest_segment_path(&dir, segment.file_path(), segment.segment_index());
        store::write_wire(&path, &data.encode())
            .await
            .map_err(FetchError::from)?;

        let next = segment.next().cloned();
        self.served_segments.insert(data.name.clone(), data.clone());
        self.manifest_chains
            .entry(chain.clone())
            .or_default()
            .push(segment);
        tracing::debug!(chain = %chain, index = known, "manifest segment accepted");

        match next {
            Some(next) => self.enqueue_request(next, Priority::Catalog),
            None => self.complete_manifest_chain(chain).await?,
        }
        Ok(true)
    }

    /// A manifest chain just completed: allocate its file state, index its
    /// packets, queue everything missing, and resolve the chain's operation.
    async fn complete_manifest_chain(&mut self, chain: Name) -> Result<(), FetchError> {
        let segs = &self.manifest_chains[&chain];
        let first = &segs[0];
        let (rel_path, file_length, packet_size) = (
            first.file_path().to_string(),
            first.file_length(),
            first.data_packet_size(),
        );
        let packets: Vec<Name> = segs.iter().flat_map(|s| s.packets().iter().cloned()).collect();

        let path = store::file_path(&self.data_dir, &rel_path);
        let file_state = FileState::allocate(path, file_length, packet_size, packets.clone())
            .await
            .map_err(FetchError::from)?;

        for (index, packet) in packets.iter().enumerate() {
            let digest = packet
                .terminal_digest()
                .ok_or(FetchError::Decode("packet entry lacks digest".to_string()))?;
            self.packet_index.insert(
                packet.strip_digest(),
                PacketSlot {
                    chain: chain.clone(),
                    index,
                    digest,
                },
            );
        }
        let missing: Vec<Name> = file_state
            .missing_indices()
            .into_iter()
            .map(|i| packets[i].clone())
            .collect();
        self.file_states.insert(chain.clone(), file_state);

        for name in missing {
            self.enqueue_request(name, Priority::Data);
        }
        if let Some(mut op) = self.manifest_ops.remove(&chain) {
            if let Some(on_success) = op.on_success.take() {
                on_success(packets);
            }
        }
        tracing::info!(chain = %chain, "manifest chain complete");
        Ok(())
    }

    async fn accept_data_packet(&mut self, data: &Data) -> Result<bool, FetchError> {
        let Some(slot) = self.packet_index.get(&data.name).cloned() else {
            return Err(FetchError::NotInCatalog);
        };
        if data.implicit_digest() != slot.digest {
            return Err(FetchError::DigestMismatch);
        }
        let Some(file_state) = self.file_states.get_mut(&slot.chain) else {
            return Err(FetchError::NotInCatalog);
        };
        if file_state.has(slot.index) {
            // Re-delivery of a validated packet: no write, no callbacks.
            return Ok(false);
        }
        let expected_len = file_state.payload_len(slot.index);
        if data.content.len() as u64 != expected_len {
            return Err(FetchError::Decode(format!(
                "packet {} payload is {} bytes, expected {expected_len}",
                slot.index,
                data.content.len()
            )));
        }
        file_state
            .write_packet(slot.index, &data.content)
            .await
            .map_err(FetchError::from)?;
        let complete = file_state.is_complete();

        let full_name = data.full_name();
        let op = self
            .packet_ops
            .remove(&full_name)
            .or_else(|| self.packet_ops.remove(&data.name));
        if let Some(mut op) = op {
            if let Some(on_success) = op.on_success.take() {
                on_success(&full_name);
            }
        }
        if self.seed_flag {
            self.face.put(data.clone());
        }
        let prefix = serving_prefix(&slot.chain);
        self.register(prefix);
        if complete {
            tracing::info!(chain = %slot.chain, "file complete");
        }
        Ok(true)
    }

    async fn write_torrent_segment(
        &mut self,
        data: &Data,
        dir: &std::path::Path,
        index: u64,
    ) -> Result<(), FetchError> {
        let path = store::torrent_segment_path(dir, index);
        store::write_wire(&path, &data.encode())
            .await
            .map_err(FetchError::from)
    }

    // ---- inbound interests ----

    async fn on_interest(&mut self, interest: Interest) {
        if !self.seed_flag || self.stopped {
            return;
        }
        let Some(at) = interest.name.find(&self.root_prefix) else {
            return;
        };
        let logical = interest.name.slice(at);
        let stripped = logical.strip_digest();

        if let Some(data) = self.served_segments.get(&stripped) {
            if logical
                .terminal_digest()
                .is_none_or(|d| d == data.implicit_digest())
            {
                self.face.put(data.clone());
            }
            return;
        }

        let Some(slot) = self.packet_index.get(&stripped).cloned() else {
            return;
        };
        if logical.terminal_digest().is_some_and(|d| d != slot.digest) {
            return;
        }
        let Some(file_state) = self.file_states.get_mut(&slot.chain) else {
            return;
        };
        if !file_state.has(slot.index) {
            return;
        }
        match file_state.read_packet(slot.index).await {
            Ok(payload) => {
                let packet = packet_from_payload(stripped, payload);
                self.face.put(packet);
            }
            Err(error) => {
                tracing::warn!(name = %stripped, error = %error, "failed to read packet for serving");
            }
        }
    }

    // ---- resume from disk ----

    fn restore_torrent_segment(&mut self, file_index: u64, bytes: &[u8]) -> Result<(), String> {
        let data = Data::decode(bytes).map_err(|e| e.to_string())?;
        if !self.key_chain.verify(&data) {
            return Err("signature did not verify".to_string());
        }
        let segment = TorrentFileSegment::from_data(&data).map_err(|e| e.to_string())?;
        if segment.chain() != self.torrent_chain {
            return Err(format!("segment belongs to another torrent: {}", data.name));
        }
        if segment.segment_index() != file_index {
            return Err(format!(
                "file named {file_index} holds segment {}",
                segment.segment_index()
            ));
        }
        let expected_index = self.torrent_segments.len() as u64;
        if segment.segment_index() != expected_index {
            return Err(format!("expected segment {expected_index}, chain has a gap"));
        }
        if let Some(previous) = self.torrent_segments.last() {
            if previous.next() != Some(&data.full_name()) {
                return Err("segment does not match predecessor's link".to_string());
            }
        }
        self.served_segments.insert(data.name.clone(), data);
        self.torrent_segments.push(segment);
        Ok(())
    }

    fn restore_manifest_segment(
        &mut self,
        rel_path: &str,
        file_index: u64,
        bytes: &[u8],
    ) -> Result<(), String> {
        let data = Data::decode(bytes).map_err(|e| e.to_string())?;
        if !self.key_chain.verify(&data) {
            return Err("signature did not verify".to_string());
        }
        let segment = FileManifestSegment::from_data(&data).map_err(|e| e.to_string())?;
        if segment.file_path() != rel_path {
            return Err(format!(
                "stored under '{rel_path}' but declares '{}'",
                segment.file_path()
            ));
        }
        if segment.segment_index() != file_index {
            return Err(format!(
                "file named {file_index} holds segment {}",
                segment.segment_index()
            ));
        }
        let chain = segment.chain();
        let known = self.manifest_chains.get(&chain).map_or(0, Vec::len);
        if segment.segment_index() != known as u64 {
            return Err(format!("expected segment {known}, chain has a gap"));
        }
        let full_name = data.full_name();
        if known == 0 {
            let listed = self
                .torrent_segments
                .iter()
                .flat_map(|seg| seg.catalog())
                .any(|entry| *entry == full_name);
            if !listed {
                return Err("not listed in any torrent segment".to_string());
            }
        } else if self.manifest_chains[&chain][known - 1].next() != Some(&full_name) {
            return Err("segment does not match predecessor's link".to_string());
        }
        self.served_segments.insert(data.name.clone(), data);
        self.manifest_chains.entry(chain).or_default().push(segment);
        Ok(())
    }

    /// Rebuild the file state of a complete chain: pre-size the file and
    /// revalidate every packet range against its catalog digest.
    async fn restore_file_state(&mut self, chain: &Name) -> Result<(), StoreError> {
        let segs = &self.manifest_chains[chain];
        let first = &segs[0];
        let (rel_path, file_length, packet_size) = (
            first.file_path().to_string(),
            first.file_length(),
            first.data_packet_size(),
        );
        let packets: Vec<Name> = segs.iter().flat_map(|s| s.packets().iter().cloned()).collect();

        let path = store::file_path(&self.data_dir, &rel_path);
        let mut file_state =
            FileState::allocate(path, file_length, packet_size, packets.clone()).await?;

        for (index, packet) in packets.iter().enumerate() {
            let Some(digest) = packet.terminal_digest() else {
                continue;
            };
            let payload = file_state.read_packet(index).await?;
            let candidate = packet_from_payload(packet.strip_digest(), payload);
            if candidate.implicit_digest() == digest {
                file_state.mark_present(index);
            }
            self.packet_index.insert(
                packet.strip_digest(),
                PacketSlot {
                    chain: chain.clone(),
                    index,
                    digest,
                },
            );
        }
        tracing::debug!(
            chain = %chain,
            present = file_state.bitmap().iter().filter(|b| **b).count(),
            total = file_state.packet_count(),
            "file state rebuilt"
        );
        self.file_states.insert(chain.clone(), file_state);
        Ok(())
    }

    async fn reset(&mut self) {
        for (_, fs) in std::mem::take(&mut self.file_states) {
            fs.close().await;
        }
        self.torrent_segments.clear();
        self.manifest_chains.clear();
        self.served_segments.clear();
        self.packet_index.clear();
        self.pending.clear();
        self.sent_index.clear();
        self.retry.clear();
        self.queued.clear();
        self.queue.clear();
        self.sorting_counter = 0;
        for prefix in self.registered_prefixes.drain(..) {
            self.face.unregister_prefix(prefix);
        }
    }

    // ---- helpers ----

    fn register(&mut self, prefix: Name) {
        if self.registered_prefixes.contains(&prefix) {
            return;
        }
        self.face.register_prefix(prefix.clone());
        self.registered_prefixes.push(prefix);
    }

    fn all_manifest_entries(&self) -> Vec<Name> {
        self.torrent_segments
            .iter()
            .flat_map(|seg| seg.catalog().iter().cloned())
            .collect()
    }

    fn complete_chain_packets(&self, chain: &Name) -> Option<Vec<Name>> {
        let segs = self.manifest_chains.get(chain)?;
        if segs.last()?.next().is_some() {
            return None;
        }
        Some(segs.iter().flat_map(|s| s.packets().iter().cloned()).collect())
    }

    /// Read-only view of the routable-prefix stats.
    pub fn stats(&self) -> &StatsTable {
        &self.stats
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// The prefix a file's artifacts are served under: the manifest chain key
/// minus its trailing marker component.
fn serving_prefix(chain: &Name) -> Name {
    if chain
        .components()
        .last()
        .is_some_and(|c| c.value() == MANIFEST_MARKER)
    {
        chain.prefix(chain.len() - 1)
    } else {
        chain.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndn::face::{FaceDriver, FaceRequest};
    use crate::ndn::name::NameComponent;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("{prefix}_{}_{}", std::process::id(), id))
    }

    fn name(uri: &str) -> Name {
        Name::from_uri(uri).unwrap()
    }

    /// Answers every interest from a published store, or times it out.
    struct TestNet {
        driver: FaceDriver,
        store: HashMap<Name, Data>,
        root: Name,
        fail_prefixes: Vec<Name>,
        sent: Vec<Name>,
    }

    impl TestNet {
        fn new(driver: FaceDriver, root: Name) -> Self {
            Self {
                driver,
                store: HashMap::new(),
                root,
                fail_prefixes: Vec::new(),
                sent: Vec::new(),
            }
        }

        fn publish(&mut self, data: &Data) {
            self.store.insert(data.name.clone(), data.clone());
        }

        fn step(&mut self) {
            while let Ok(request) = self.driver.requests.try_recv() {
                let FaceRequest::ExpressInterest(interest) = request else {
                    continue;
                };
                self.sent.push(interest.name.clone());
                if self
                    .fail_prefixes
                    .iter()
                    .any(|p| p.is_prefix_of(&interest.name))
                {
                    let _ = self
                        .driver
                        .events
                        .send(FaceEvent::InterestTimeout(interest.name));
                    continue;
                }
                let logical = match interest.name.find(&self.root) {
                    Some(at) => interest.name.slice(at),
                    None => interest.name.clone(),
                };
                match self.store.get(&logical.strip_digest()) {
                    Some(data) => {
                        let _ = self.driver.events.send(FaceEvent::Data(data.clone()));
                    }
                    None => {
                        let _ = self
                            .driver
                            .events
                            .send(FaceEvent::InterestTimeout(interest.name));
                    }
                }
            }
        }
    }

    async fn drive(manager: &mut TorrentManager, net: &mut TestNet, rounds: usize) {
        for _ in 0..rounds {
            net.step();
            manager.process_events(Duration::from_millis(2)).await;
        }
    }

    /// One file, one manifest segment, `payload_chunks` data packets.
    struct SmallTorrent {
        torrent_name: Name,
        torrent_data: Data,
        manifest_data: Data,
        packet_datas: Vec<Data>,
        packet_names: Vec<Name>,
    }

    fn small_torrent(root_uri: &str, rel_path: &str, content: &[u8], packet_size: u64) -> SmallTorrent {
        let key_chain = KeyChain::new();
        let root = name(root_uri);
        let mut packet_datas = Vec::new();
        let mut packet_names = Vec::new();
        let chunks: Vec<&[u8]> = if content.is_empty() {
            Vec::new()
        } else {
            content.chunks(packet_size as usize).collect()
        };
        for (i, chunk) in chunks.iter().enumerate() {
            let packet = packet_from_payload(
                name(&format!("{}/{rel_path}/data/seg={i}", root)),
                chunk.to_vec(),
            );
            packet_names.push(packet.full_name());
            packet_datas.push(packet);
        }
        let manifest = FileManifestSegment::new(
            name(&format!("{}/{rel_path}/manifest/seg=0", root)),
            rel_path.to_string(),
            content.len() as u64,
            packet_size,
            (packet_names.len() as u64).max(1),
            packet_names.clone(),
            None,
        );
        let manifest_data = manifest.to_data(&key_chain).unwrap();
        let torrent = TorrentFileSegment::new(
            name(&format!("{}/torrent-file/seg=0", root)),
            vec![manifest_data.full_name()],
            None,
        );
        let torrent_data = torrent.to_data(&key_chain).unwrap();
        SmallTorrent {
            torrent_name: torrent.name().clone(),
            torrent_data,
            manifest_data,
            packet_datas,
            packet_names,
        }
    }

    fn manager_with_net(
        root_uri: &str,
        torrent_name: Name,
        prefixes: &[&str],
    ) -> (TorrentManager, TestNet, PathBuf) {
        let (face, driver) = Face::pair();
        let dir = unique_temp_dir("ntorrent_mgr");
        let prefixes: Vec<Name> = prefixes.iter().map(|p| name(p)).collect();
        let manager = TorrentManager::new(
            torrent_name,
            dir.clone(),
            true,
            face,
            KeyChain::new(),
            &prefixes,
        );
        let net = TestNet::new(driver, name(root_uri));
        (manager, net, dir)
    }

    #[tokio::test]
    async fn fresh_directory_wants_the_root_segment() {
        let t = small_torrent("/nt/demo", "a.bin", &[1, 2, 3], 2);
        let (mut manager, _net, _dir) =
            manager_with_net("/nt/demo", t.torrent_name.clone(), &["/hub/a"]);
        manager.initialize().await.unwrap();
        assert!(!manager.has_all_torrent_segments());
        assert_eq!(
            manager.find_torrent_file_segment_to_download(),
            Some(t.torrent_name)
        );
        let mut missing = Vec::new();
        manager.find_all_missing_data_packets(&mut missing);
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn window_never_exceeds_fifty_outstanding() {
        let t = small_torrent("/nt/demo", "a.bin", &[0], 1);
        let (mut manager, mut net, _dir) =
            manager_with_net("/nt/demo", t.torrent_name.clone(), &["/hub/a"]);
        manager.initialize().await.unwrap();
        for i in 0..(WINDOW_SIZE + 10) {
            let packet_name = name(&format!("/nt/demo/a.bin/data/seg={i}"))
                .child(NameComponent::implicit_digest([i as u8; 32]));
            manager.download_data_packet(
                packet_name,
                Box::new(|_| {}),
                Box::new(|_, _| {}),
            );
        }
        assert_eq!(manager.pending_len(), WINDOW_SIZE);
        net.step();
        assert_eq!(net.sent.len(), WINDOW_SIZE);
    }

    #[tokio::test]
    async fn retry_ladder_rotates_prefixes_then_fails_terminally() {
        let t = small_torrent("/nt/demo", "a.bin", &[0], 1);
        let (mut manager, mut net, _dir) =
            manager_with_net("/nt/demo", t.torrent_name.clone(), &["/hub/a", "/hub/b"]);
        net.fail_prefixes = vec![name("/hub/a"), name("/hub/b")];
        manager.initialize().await.unwrap();

        let packet_name =
            name("/nt/demo/a.bin/data/seg=0").child(NameComponent::implicit_digest([3; 32]));
        let failures: Arc<Mutex<Vec<(Name, FetchError)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        manager.download_data_packet(
            packet_name.clone(),
            Box::new(|_| panic!("must not succeed")),
            Box::new(move |n, e| sink.lock().unwrap().push((n.clone(), e.clone()))),
        );
        drive(&mut manager, &mut net, 15).await;

        let under_a = net
            .sent
            .iter()
            .filter(|n| name("/hub/a").is_prefix_of(n))
            .count();
        let under_b = net
            .sent
            .iter()
            .filter(|n| name("/hub/b").is_prefix_of(n))
            .count();
        assert_eq!(under_a, MAX_NUM_OF_RETRIES as usize);
        assert_eq!(under_b, MAX_NUM_OF_RETRIES as usize);

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, packet_name);
        assert_eq!(failures[0].1, FetchError::Timeout);
        assert_eq!(manager.pending_len(), 0);
        assert_eq!(manager.stats().get(&name("/hub/a")).unwrap().successes(), 0);
    }

    #[tokio::test]
    async fn unlisted_manifest_is_rejected_as_not_in_catalog() {
        let t = small_torrent("/nt/demo", "a.bin", &[1, 2, 3, 4], 2);
        let rogue = small_torrent("/nt/demo", "rogue.bin", &[9, 9], 2);
        let (mut manager, mut net, dir) =
            manager_with_net("/nt/demo", t.torrent_name.clone(), &["/hub/a"]);
        net.publish(&t.torrent_data);
        net.publish(&rogue.manifest_data);
        manager.initialize().await.unwrap();
        manager.download_torrent_file(
            store::torrent_dir(&dir),
            Box::new(|_| {}),
            Box::new(|_, _| {}),
        );
        drive(&mut manager, &mut net, 3).await;

        let failures: Arc<Mutex<Vec<FetchError>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        manager.download_file_manifest(
            rogue.manifest_data.name.clone(),
            store::manifests_dir(&dir),
            Box::new(|_| panic!("must not succeed")),
            Box::new(move |_, e| sink.lock().unwrap().push(e.clone())),
        );
        drive(&mut manager, &mut net, 12).await;

        let failures = failures.lock().unwrap();
        assert_eq!(failures.as_slice(), &[FetchError::NotInCatalog]);
        let rogue_on_disk = store::manifests_dir(&dir).join("rogue.bin");
        assert!(!rogue_on_disk.exists());
    }

    #[tokio::test]
    async fn late_data_is_discarded() {
        let t = small_torrent("/nt/demo", "a.bin", &[1, 2, 3], 2);
        let (mut manager, net, _dir) =
            manager_with_net("/nt/demo", t.torrent_name.clone(), &["/hub/a"]);
        manager.initialize().await.unwrap();
        net.driver
            .events
            .send(FaceEvent::Data(t.torrent_data.clone()))
            .unwrap();
        manager.process_events(Duration::from_millis(2)).await;
        assert!(!manager.has_all_torrent_segments());
        assert_eq!(manager.stats().get(&name("/hub/a")).unwrap().successes(), 0);
    }

    #[tokio::test]
    async fn whole_pipeline_materializes_the_file() {
        let content: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let t = small_torrent("/nt/demo", "a.bin", &content, 128);
        let (mut manager, mut net, dir) =
            manager_with_net("/nt/demo", t.torrent_name.clone(), &["/hub/a"]);
        net.publish(&t.torrent_data);
        net.publish(&t.manifest_data);
        for p in &t.packet_datas {
            net.publish(p);
        }
        manager.initialize().await.unwrap();

        let received: Arc<Mutex<Vec<Vec<Name>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        manager.download_torrent_file(
            store::torrent_dir(&dir),
            Box::new(move |entries| sink.lock().unwrap().push(entries)),
            Box::new(|n, e| panic!("torrent download failed: {n}: {e}")),
        );
        drive(&mut manager, &mut net, 20).await;

        assert!(manager.has_all_torrent_segments());
        let mut missing = Vec::new();
        manager.find_all_missing_data_packets(&mut missing);
        assert!(missing.is_empty(), "still missing: {missing:?}");
        for packet_name in &t.packet_names {
            assert!(manager.has_data_packet(packet_name));
        }
        assert_eq!(received.lock().unwrap().len(), 1);

        let on_disk = tokio::fs::read(dir.join("a.bin")).await.unwrap();
        assert_eq!(on_disk, content);

        // 1 torrent segment + 1 manifest segment + 3 packets.
        assert_eq!(manager.stats().get(&name("/hub/a")).unwrap().successes(), 5);
    }
}
