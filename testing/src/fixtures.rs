use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use capture_core::{
    ContentNormalizer, DestinationStore, Failure, NormalizedText, PayloadFetcher, RawItem, Source
};
use parking_lot::Mutex;
use storage::{FsVault, StagingLedger};
use tempfile::TempDir;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", prefix, id)
}

pub fn raw_voice(external_id: &str) -> RawItem {
    RawItem {
        source: Source::Voice,
        external_id: external_id.to_string(),
        payload_ref: format!("voice/{external_id}"),
        discovered_at: 1_717_200_000_000,
        metadata: serde_json::json!({ "path": format!("Voice Memos/{external_id}.m4a") })
    }
}

pub fn raw_email(external_id: &str) -> RawItem {
    RawItem {
        source: Source::Email,
        external_id: external_id.to_string(),
        payload_ref: format!("mail/{external_id}"),
        discovered_at: 1_717_200_000_000,
        metadata: serde_json::json!({ "message_id": external_id })
    }
}

/// A ledger stored in a temp directory. Dropping the fixture deletes it.
pub struct LedgerFixture {
    dir: TempDir,
    ledger: Arc<StagingLedger>
}

impl LedgerFixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir for ledger");
        let ledger = open_ledger(dir.path()).await;
        Self {
            dir,
            ledger: Arc::new(ledger)
        }
    }

    pub fn ledger(&self) -> Arc<StagingLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("ledger.db")
    }

    /// Closes the current handle and opens the same file again, as a
    /// restarted process would.
    pub async fn reopen(&mut self) -> Arc<StagingLedger> {
        self.ledger.close().await;
        self.ledger = Arc::new(open_ledger(self.dir.path()).await);
        self.ledger()
    }
}

async fn open_ledger(dir: &Path) -> StagingLedger {
    let url = format!("sqlite://{}?mode=rwc", dir.join("ledger.db").display());
    StagingLedger::connect(&url, Duration::from_secs(5))
        .await
        .expect("open ledger")
}

/// A vault in a temp directory.
pub struct VaultFixture {
    dir: TempDir,
    vault: Arc<FsVault>
}

impl VaultFixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir for vault");
        let vault = FsVault::open(dir.path()).await.expect("open vault");
        Self {
            dir,
            vault: Arc::new(vault)
        }
    }

    pub fn vault(&self) -> Arc<FsVault> {
        Arc::clone(&self.vault)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Visible files (notes), sorted by name. Temp files are excluded.
    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .expect("read vault dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        names
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("read vault file")
    }
}

#[derive(Default)]
struct Script<T> {
    results: HashMap<String, T>,
    failures: HashMap<String, VecDeque<Failure>>,
    always: HashMap<String, Failure>,
    calls: HashMap<String, usize>
}

impl<T: Clone> Script<T> {
    fn next(&mut self, payload_ref: &str) -> Option<Result<T, Failure>> {
        *self.calls.entry(payload_ref.to_string()).or_default() += 1;
        if let Some(failure) = self.always.get(payload_ref) {
            return Some(Err(failure.clone()));
        }
        if let Some(failure) = self
            .failures
            .get_mut(payload_ref)
            .and_then(VecDeque::pop_front)
        {
            return Some(Err(failure));
        }
        self.results.get(payload_ref).cloned().map(Ok)
    }
}

/// Serves fixed payloads per `payload_ref`, failing first when told to.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<Script<Vec<u8>>>
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(self, payload_ref: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.script
            .lock()
            .results
            .insert(payload_ref.to_string(), bytes.into());
        self
    }

    /// Queues `times` failures before the payload is served.
    pub fn fail_times(self, payload_ref: &str, times: usize, failure: Failure) -> Self {
        let mut script = self.script.lock();
        let queue = script.failures.entry(payload_ref.to_string()).or_default();
        queue.extend(std::iter::repeat_n(failure, times));
        drop(script);
        self
    }

    pub fn fail_always(self, payload_ref: &str, failure: Failure) -> Self {
        self.script
            .lock()
            .always
            .insert(payload_ref.to_string(), failure);
        self
    }

    pub fn calls(&self, payload_ref: &str) -> usize {
        self.script
            .lock()
            .calls
            .get(payload_ref)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PayloadFetcher for ScriptedFetcher {
    async fn fetch(&self, _source: Source, payload_ref: &str) -> Result<Vec<u8>, Failure> {
        self.script.lock().next(payload_ref).unwrap_or_else(|| {
            Err(Failure::status(404, format!("no payload scripted for {payload_ref}")))
        })
    }
}

/// Transcribes/normalizes by decoding the payload as UTF-8, unless a
/// transcript is scripted for the `payload_ref`.
#[derive(Default)]
pub struct ScriptedNormalizer {
    script: Mutex<Script<String>>
}

impl ScriptedNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, payload_ref: &str, text: &str) -> Self {
        self.script
            .lock()
            .results
            .insert(payload_ref.to_string(), text.to_string());
        self
    }

    pub fn fail_times(self, payload_ref: &str, times: usize, failure: Failure) -> Self {
        let mut script = self.script.lock();
        let queue = script.failures.entry(payload_ref.to_string()).or_default();
        queue.extend(std::iter::repeat_n(failure, times));
        drop(script);
        self
    }

    pub fn fail_always(self, payload_ref: &str, failure: Failure) -> Self {
        self.script
            .lock()
            .always
            .insert(payload_ref.to_string(), failure);
        self
    }

    pub fn calls(&self, payload_ref: &str) -> usize {
        self.script
            .lock()
            .calls
            .get(payload_ref)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContentNormalizer for ScriptedNormalizer {
    async fn normalize(
        &self,
        _source: Source,
        payload_ref: &str,
        payload: &[u8]
    ) -> Result<NormalizedText, Failure> {
        let scripted = self.script.lock().next(payload_ref);
        match scripted {
            Some(result) => result.map(NormalizedText),
            None => Ok(NormalizedText(String::from_utf8_lossy(payload).into_owned()))
        }
    }
}

/// Wraps a destination store and counts temp writes and renames.
pub struct CountingStore<D> {
    inner: D,
    writes: AtomicUsize,
    renames: AtomicUsize
}

impl<D> CountingStore<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            renames: AtomicUsize::new(0)
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn renames(&self) -> usize {
        self.renames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<D: DestinationStore> DestinationStore for CountingStore<D> {
    fn final_path(&self, file_name: &str) -> PathBuf {
        self.inner.final_path(file_name)
    }

    async fn write_temp(&self, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_temp(file_name, bytes).await
    }

    async fn fsync(&self, path: &Path) -> io::Result<()> {
        self.inner.fsync(path).await
    }

    async fn rename(&self, tmp: &Path, final_path: &Path) -> io::Result<()> {
        self.renames.fetch_add(1, Ordering::SeqCst);
        self.inner.rename(tmp, final_path).await
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        self.inner.exists(path).await
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn discard(&self, tmp: &Path) -> io::Result<()> {
        self.inner.discard(tmp).await
    }

    async fn sweep_temp(&self) -> io::Result<usize> {
        self.inner.sweep_temp().await
    }
}
