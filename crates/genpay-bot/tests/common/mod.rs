//! Shared fakes for the generation pipeline tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use genpay_bot::{Dependencies, GenerateConfig, OutboxMessenger, Pipeline, PollPolicy, assemble};
use genpay_core::{
    ArtifactStream, GenerateError, GenerationArtifact, GenerationProvider, JobHandle, JobId,
    JobSnapshot, JobStatus, MemorySessionStore, SharedProvider, UserId,
};
use genpay_payments::{
    CreatedInvoice, InvoiceParams, LightningWallet, MemoryInvoiceStore, MemoryWalletDirectory,
    PaymentError, Settlement, Wallet,
};

pub const PRICE: u64 = 1000;

pub fn user() -> UserId {
    UserId::new("1001")
}

pub fn wallet(id: &str) -> Wallet {
    Wallet {
        id: id.into(),
        admin_key: format!("{id}-admin"),
        invoice_key: format!("{id}-invoice"),
    }
}

pub fn snapshot(status: JobStatus, artifacts: &[&str]) -> JobSnapshot {
    JobSnapshot {
        id: JobId::new("task-1"),
        status,
        artifacts: artifacts.iter().map(|id| GenerationArtifact::new(*id)).collect(),
    }
}

/// Generation provider that replays a scripted status sequence
#[derive(Default)]
pub struct ScriptedProvider {
    statuses: Mutex<VecDeque<Result<JobSnapshot, GenerateError>>>,
    downloads: Mutex<HashMap<String, Vec<u8>>>,
    fail_submit: bool,
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(statuses: Vec<Result<JobSnapshot, GenerateError>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            ..Self::default()
        }
    }

    pub fn failing_submit() -> Self {
        Self {
            fail_submit: true,
            ..Self::default()
        }
    }

    /// Serve `bytes` for `artifact`; unknown artifacts fail to download
    pub fn with_download(self, artifact: &str, bytes: &[u8]) -> Self {
        self.downloads
            .lock()
            .unwrap()
            .insert(artifact.to_string(), bytes.to_vec());
        self
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn submit(&self, _prompt: &str) -> Result<JobHandle, GenerateError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if self.fail_submit {
            return Err(GenerateError::ProviderUnavailable("submit refused".into()));
        }
        Ok(JobHandle {
            id: JobId::new("task-1"),
        })
    }

    async fn status(&self, _job: &JobId) -> Result<JobSnapshot, GenerateError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(snapshot(JobStatus::Pending, &[])))
    }

    async fn download(&self, artifact: &GenerationArtifact) -> Result<ArtifactStream, GenerateError> {
        let bytes = self.downloads.lock().unwrap().get(&artifact.id).cloned();
        match bytes {
            Some(bytes) => {
                let (head, tail) = bytes.split_at(bytes.len() / 2);
                let chunks = vec![Ok(head.to_vec()), Ok(tail.to_vec())];
                Ok(Box::pin(stream::iter(chunks)))
            }
            None => Err(GenerateError::Provider(format!("no such artifact {}", artifact.id))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Lightning backend that records every call
#[derive(Default)]
pub struct RecordingLightning {
    balances: Mutex<HashMap<String, u64>>,
    pub created: Mutex<Vec<(String, InvoiceParams)>>,
    pub paid: Mutex<Vec<(String, String)>>,
    pub fail_pay_from: Mutex<Option<String>>,
    counter: AtomicUsize,
}

impl RecordingLightning {
    pub fn set_balance(&self, wallet_id: &str, sats: u64) {
        self.balances.lock().unwrap().insert(wallet_id.into(), sats);
    }

    pub fn payments_from(&self, wallet_id: &str) -> usize {
        self.paid
            .lock()
            .unwrap()
            .iter()
            .filter(|(from, _)| from == wallet_id)
            .count()
    }

    pub fn invoices_on(&self, wallet_id: &str) -> Vec<InvoiceParams> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(on, _)| on == wallet_id)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl LightningWallet for RecordingLightning {
    async fn create_invoice(
        &self,
        wallet: &Wallet,
        params: &InvoiceParams,
    ) -> Result<CreatedInvoice, PaymentError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.created
            .lock()
            .unwrap()
            .push((wallet.id.clone(), params.clone()));
        Ok(CreatedInvoice {
            payment_request: format!("lnbc{n}"),
            payment_hash: format!("hash{n}"),
        })
    }

    async fn pay(&self, wallet: &Wallet, payment_request: &str) -> Result<Settlement, PaymentError> {
        self.paid
            .lock()
            .unwrap()
            .push((wallet.id.clone(), payment_request.to_string()));
        if self.fail_pay_from.lock().unwrap().as_deref() == Some(wallet.id.as_str()) {
            return Err(PaymentError::Lightning("route not found".into()));
        }
        Ok(Settlement {
            payment_hash: format!("settled-{payment_request}"),
        })
    }

    async fn balance(&self, wallet: &Wallet) -> Result<u64, PaymentError> {
        Ok(self.balances.lock().unwrap().get(&wallet.id).copied().unwrap_or(0))
    }

    async fn is_paid(&self, _wallet: &Wallet, _payment_hash: &str) -> Result<bool, PaymentError> {
        Ok(true)
    }
}

pub struct Harness {
    pub invoices: Arc<MemoryInvoiceStore>,
    pub wallets: Arc<MemoryWalletDirectory>,
    pub lightning: Arc<RecordingLightning>,
    pub messenger: Arc<OutboxMessenger>,
    pub provider: Arc<ScriptedProvider>,
    pub pipeline: Pipeline,
    pub artifacts: tempfile::TempDir,
}

pub fn config(artifact_dir: &std::path::Path) -> GenerateConfig {
    GenerateConfig {
        price_sat: PRICE,
        deadline: Duration::from_secs(60),
        poll: PollPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_attempts: 10,
            jitter: 0.0,
        },
        artifact_dir: artifact_dir.to_path_buf(),
        ..GenerateConfig::default()
    }
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::with_config(provider, config)
    }

    pub fn with_config(
        provider: ScriptedProvider,
        make_config: impl FnOnce(&std::path::Path) -> GenerateConfig,
    ) -> Self {
        let artifacts = tempfile::tempdir().unwrap();
        let invoices = Arc::new(MemoryInvoiceStore::new());
        let wallets = Arc::new(MemoryWalletDirectory::new());
        let lightning = Arc::new(RecordingLightning::default());
        let messenger = Arc::new(OutboxMessenger::new());
        let provider = Arc::new(provider);

        wallets.register(user(), wallet("user-wallet")).unwrap();

        let pipeline = assemble(
            Dependencies {
                invoices: invoices.clone(),
                sessions: Arc::new(MemorySessionStore::new()),
                wallets: wallets.clone(),
                lightning: lightning.clone(),
                messenger: messenger.clone(),
                provider: Arc::new(SharedProvider(provider.clone())),
                service_wallet: wallet("service-wallet"),
            },
            make_config(artifacts.path()),
            16,
        );

        Self {
            invoices,
            wallets,
            lightning,
            messenger,
            provider,
            pipeline,
            artifacts,
        }
    }
}
