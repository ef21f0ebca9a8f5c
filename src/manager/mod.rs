//! Transaction executor: retry loop, timeout race, instrumentation, and
//! the convenience operations built on top of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

use crate::classify::{classify, Classified, ErrorKind, WorkError};
use crate::driver::Driver;
use crate::options::{
    IsolationLevel, Operation, RecordId, TransactionMetadata, TransactionOptions,
    TransactionResult,
};
use crate::retry::{Jitter, RetryPolicy, ThreadRngJitter};
use crate::store::EntityStore;
use crate::{Result, TransactionError};

// ============================================================================
// Unit of work
// ============================================================================

/// A transactional unit of work.
///
/// `run` may be invoked several times for one logical call: each retry gets
/// a fresh transaction handle after the previous attempt rolled back. Keep
/// side effects inside the transaction.
#[async_trait]
pub trait TxWork<D: Driver>: Send + Sync {
    type Output: Send;

    async fn run(&self, tx: &mut D::Tx) -> std::result::Result<Self::Output, WorkError>;
}

// ============================================================================
// Per-operation option overrides
// ============================================================================

/// Sparse per-call overrides for the convenience operations. Unset fields
/// fall back to the manager's process-wide defaults at call time.
#[derive(Debug, Clone, Default)]
pub struct OpOptions {
    pub isolation: Option<IsolationLevel>,
    pub max_retries: Option<u32>,
    pub retry_delay_base: Option<Duration>,
    pub timeout: Option<Duration>,
    pub logging_enabled: Option<bool>,
    pub actor_id: Option<String>,
    pub description: Option<String>,
}

impl OpOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn retry_delay_base(mut self, base: Duration) -> Self {
        self.retry_delay_base = Some(base);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = Some(enabled);
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Resolve overrides against the manager defaults, attaching `metadata`.
    fn resolve(&self, defaults: &TransactionOptions, mut metadata: TransactionMetadata) -> TransactionOptions {
        if let Some(actor) = &self.actor_id {
            metadata.actor_id = Some(actor.clone());
        }
        if let Some(description) = &self.description {
            metadata.description = Some(description.clone());
        }
        TransactionOptions {
            isolation: self.isolation.unwrap_or(defaults.isolation),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_delay_base: self.retry_delay_base.unwrap_or(defaults.retry_delay_base),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            logging_enabled: self.logging_enabled.unwrap_or(defaults.logging_enabled),
            metadata,
        }
    }
}

// ============================================================================
// TransactionManager
// ============================================================================

/// Executes units of work inside driver transactions with isolation
/// control, per-attempt timeouts, classified errors, and backoff retry.
///
/// One instance per driver is enough; calls are independent and may run
/// concurrently. Retries within a call are strictly sequential — at most
/// one driver transaction is open per call at any instant.
pub struct TransactionManager<D: Driver> {
    driver: D,
    defaults: TransactionOptions,
    jitter: Box<dyn Jitter>,
    /// Monotonic sequence for transaction ids, scoped to this instance.
    tx_counter: AtomicU64,
}

impl<D: Driver> TransactionManager<D> {
    pub fn new(driver: D) -> Self {
        Self::with_defaults(driver, TransactionOptions::default())
    }

    /// Create a manager with custom process-wide default options.
    pub fn with_defaults(driver: D, defaults: TransactionOptions) -> Self {
        Self {
            driver,
            defaults,
            jitter: Box::new(ThreadRngJitter),
            tx_counter: AtomicU64::new(0),
        }
    }

    /// Replace the backoff jitter source (deterministic tests).
    pub fn with_jitter(mut self, jitter: impl Jitter + 'static) -> Self {
        self.jitter = Box::new(jitter);
        self
    }

    /// Access the underlying driver (for setup and assertions).
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// A copy of the process-wide defaults, as a starting point for
    /// per-call overrides.
    pub fn options(&self) -> TransactionOptions {
        self.defaults.clone()
    }

    fn next_transaction_id(&self) -> String {
        let seq = self.tx_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("tx_{}_{}", Utc::now().timestamp_millis(), seq)
    }

    // ========================================================================
    // Core executor
    // ========================================================================

    /// Run `work` inside a transaction with retry, timeout, and logging.
    ///
    /// The timeout bounds each attempt, not the whole retry sequence, and
    /// it stops *waiting*: the attempt future is dropped, which abandons
    /// the handle, but a statement already running on the backend is not
    /// actively canceled by this layer.
    pub async fn execute<W>(
        &self,
        work: &W,
        opts: TransactionOptions,
    ) -> Result<TransactionResult<W::Output>>
    where
        W: TxWork<D> + ?Sized,
    {
        let transaction_id = self.next_transaction_id();
        let policy = RetryPolicy::new(opts.max_retries, opts.retry_delay_base);
        let started_at = Utc::now();
        let clock = Instant::now();

        if opts.logging_enabled {
            info!(
                transaction_id = %transaction_id,
                isolation = %opts.isolation,
                operation = %opts.metadata.operation,
                entity = %opts.metadata.entity_name,
                actor = opts.metadata.actor_id.as_deref(),
                "transaction started"
            );
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let failure = match self.run_attempt(work, &opts).await {
                Ok(value) => {
                    let ended_at = Utc::now();
                    let duration = clock.elapsed();
                    if opts.logging_enabled {
                        info!(
                            transaction_id = %transaction_id,
                            duration_ms = duration.as_millis() as u64,
                            attempts = attempt,
                            operation = %opts.metadata.operation,
                            entity = %opts.metadata.entity_name,
                            "transaction completed"
                        );
                    }
                    return Ok(TransactionResult {
                        value,
                        started_at,
                        ended_at,
                        duration,
                        metadata: opts.metadata,
                    });
                }
                Err(f) => f,
            };

            let (classified, cause) = match failure {
                AttemptFailure::Work(err) => (classify(&err), Some(err)),
                AttemptFailure::TimedOut => (
                    Classified {
                        kind: ErrorKind::Timeout,
                        message: format!(
                            "transaction timed out after {}ms",
                            opts.timeout.as_millis()
                        ),
                    },
                    None,
                ),
            };

            let will_retry = policy.should_retry(classified.kind, attempt);

            if opts.logging_enabled {
                error!(
                    transaction_id = %transaction_id,
                    error_kind = %classified.kind,
                    attempt,
                    will_retry,
                    operation = %opts.metadata.operation,
                    entity = %opts.metadata.entity_name,
                    "transaction error: {}",
                    classified.message
                );
            }

            if will_retry {
                let delay = policy.delay_for(attempt, self.jitter.as_ref());
                if opts.logging_enabled {
                    info!(
                        transaction_id = %transaction_id,
                        attempt,
                        next_attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying transaction"
                    );
                }
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(TransactionError {
                kind: classified.kind,
                message: classified.message,
                transaction_id,
                metadata: Some(opts.metadata),
                attempt_count: attempt,
                cause,
                raw_query: None,
                raw_params: None,
            });
        }
    }

    /// One attempt: begin, set isolation, run the work, commit on success,
    /// roll back on failure, the whole thing raced against the timeout.
    async fn run_attempt<W>(
        &self,
        work: &W,
        opts: &TransactionOptions,
    ) -> std::result::Result<W::Output, AttemptFailure>
    where
        W: TxWork<D> + ?Sized,
    {
        let attempt = async {
            let mut tx = self.driver.begin().await.map_err(WorkError::from)?;

            if let Err(e) = self.driver.set_isolation(&mut tx, opts.isolation).await {
                let _ = self.driver.rollback(tx).await;
                return Err(WorkError::from(e));
            }

            match work.run(&mut tx).await {
                Ok(value) => {
                    self.driver.commit(tx).await.map_err(WorkError::from)?;
                    Ok(value)
                }
                Err(e) => {
                    let _ = self.driver.rollback(tx).await;
                    Err(e)
                }
            }
        };

        match tokio::time::timeout(opts.timeout, attempt).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(AttemptFailure::Work(err)),
            Err(_elapsed) => Err(AttemptFailure::TimedOut),
        }
    }

    // ========================================================================
    // Convenience operations
    // ========================================================================

    /// Insert one record inside a retried transaction.
    pub async fn create<S>(&self, store: &S, draft: S::Draft, options: OpOptions) -> Result<S::Record>
    where
        S: EntityStore<D>,
    {
        let metadata = TransactionMetadata::new(Operation::Create, store.entity_name());
        let opts = options.resolve(&self.defaults, metadata);
        let op = CreateOp { store, draft };
        Ok(self.execute(&op, opts).await?.value)
    }

    /// Update one record by primary key inside a retried transaction.
    pub async fn update<S>(
        &self,
        store: &S,
        id: impl Into<RecordId>,
        patch: S::Patch,
        options: OpOptions,
    ) -> Result<S::Record>
    where
        S: EntityStore<D>,
    {
        let id = id.into();
        let metadata =
            TransactionMetadata::new(Operation::Update, store.entity_name()).record_id(id.clone());
        let opts = options.resolve(&self.defaults, metadata);
        let op = UpdateOp { store, id, patch };
        Ok(self.execute(&op, opts).await?.value)
    }

    /// Delete one record by primary key inside a retried transaction.
    pub async fn delete<S>(
        &self,
        store: &S,
        id: impl Into<RecordId>,
        options: OpOptions,
    ) -> Result<S::Record>
    where
        S: EntityStore<D>,
    {
        let id = id.into();
        let metadata =
            TransactionMetadata::new(Operation::Delete, store.entity_name()).record_id(id.clone());
        let opts = options.resolve(&self.defaults, metadata);
        let op = DeleteOp { store, id };
        Ok(self.execute(&op, opts).await?.value)
    }

    /// Run `steps` in order inside one transaction/retry envelope. If any
    /// step fails the whole batch rolls back; a transient failure retries
    /// the batch as a unit, never per step.
    pub async fn batch<T>(
        &self,
        steps: &[Box<dyn TxWork<D, Output = T>>],
        options: OpOptions,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
    {
        let metadata = TransactionMetadata::new(Operation::Batch, "multiple");
        let opts = options.resolve(&self.defaults, metadata);
        let op = BatchOp { steps };
        Ok(self.execute(&op, opts).await?.value)
    }
}

enum AttemptFailure {
    Work(WorkError),
    TimedOut,
}

// ============================================================================
// Convenience op work items
// ============================================================================

struct CreateOp<'s, S, Draft> {
    store: &'s S,
    draft: Draft,
}

#[async_trait]
impl<'s, D, S> TxWork<D> for CreateOp<'s, S, S::Draft>
where
    D: Driver,
    S: EntityStore<D>,
{
    type Output = S::Record;

    async fn run(&self, tx: &mut D::Tx) -> std::result::Result<S::Record, WorkError> {
        self.store.insert(tx, self.draft.clone()).await
    }
}

struct UpdateOp<'s, S, Patch> {
    store: &'s S,
    id: RecordId,
    patch: Patch,
}

#[async_trait]
impl<'s, D, S> TxWork<D> for UpdateOp<'s, S, S::Patch>
where
    D: Driver,
    S: EntityStore<D>,
{
    type Output = S::Record;

    async fn run(&self, tx: &mut D::Tx) -> std::result::Result<S::Record, WorkError> {
        self.store.update(tx, &self.id, self.patch.clone()).await
    }
}

struct DeleteOp<'s, S> {
    store: &'s S,
    id: RecordId,
}

#[async_trait]
impl<'s, D, S> TxWork<D> for DeleteOp<'s, S>
where
    D: Driver,
    S: EntityStore<D>,
{
    type Output = S::Record;

    async fn run(&self, tx: &mut D::Tx) -> std::result::Result<S::Record, WorkError> {
        self.store.delete(tx, &self.id).await
    }
}

struct BatchOp<'s, D: Driver, T> {
    steps: &'s [Box<dyn TxWork<D, Output = T>>],
}

#[async_trait]
impl<'s, D, T> TxWork<D> for BatchOp<'s, D, T>
where
    D: Driver,
    T: Send + 'static,
{
    type Output = Vec<T>;

    async fn run(&self, tx: &mut D::Tx) -> std::result::Result<Vec<T>, WorkError> {
        let mut results = Vec::with_capacity(self.steps.len());
        for step in self.steps {
            results.push(step.run(tx).await?);
        }
        Ok(results)
    }
}
