//! Hedged Send Controller (spec.md §4.5): periodically launches parallel
//! attempts on distinct instances, races their results, honors a giveup
//! deadline, and delivers exactly one result payload to the caller's
//! receptacle without data races. Grounded in control-flow shape — a
//! `select!` over a ticker, a deadline, and a results channel — on the
//! teacher's retry/backoff loops (`agentgateway::client::retry`), adapted to
//! the spec's hedge-not-backoff semantics: every tick spawns a *new*
//! concurrent attempt rather than replacing the previous one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{Instrument, debug, instrument, warn};

use crate::error::DispatchError;
use crate::instance::TimeoutConfig;
use crate::metrics::{ClientMetrics, Outcome, SendOutcome};
use crate::mux::MuxHandle;
use crate::receptacle::Receptacle;
use crate::transport::RpcTransport;
use crate::wire::{BincodeCodec, Codec, RequestEnvelope, RequestInfo};

/// `Send(requestInfo?, method, input, outputReceptacle) -> error` (spec.md
/// §4.5, §6). Hedges across instances: a fresh attempt is spawned
/// immediately, then again on every `retry` tick, until one succeeds or the
/// `giveup` deadline fires.
#[instrument(skip_all, fields(method))]
pub async fn send<T, R>(
    mux: &MuxHandle<T>,
    metrics: Option<Arc<ClientMetrics>>,
    request_info: Option<RequestInfo>,
    method: &str,
    input: &impl Serialize,
    receptacle: &mut R,
) -> Result<(), DispatchError>
where
    T: RpcTransport + Clone,
    R: Receptacle,
{
    let TimeoutConfig { retry, giveup } = mux.get_timeout();
    let input_bytes = BincodeCodec::encode(input)?;
    let request_info = Arc::new(request_info.unwrap_or_else(RequestInfo::generate));
    let method: Arc<str> = Arc::from(method);

    let exclusion: Arc<AsyncMutex<HashSet<String>>> = Arc::new(AsyncMutex::new(HashSet::new()));
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();

    macro_rules! spawn_attempt {
        () => {
            spawn_attempt_task(
                mux.clone(),
                exclusion.clone(),
                request_info.clone(),
                method.clone(),
                input_bytes.clone(),
                receptacle.blank(),
                results_tx.clone(),
                metrics.clone(),
            )
        };
    }

    spawn_attempt!();

    // `interval_at` so the ticker's first tick lands one `retry` interval from
    // now, not immediately — the immediate attempt was already spawned above.
    let mut ticker =
        (!retry.is_zero()).then(|| tokio::time::interval_at(tokio::time::Instant::now() + retry, retry));
    let giveup_sleep = tokio::time::sleep(if giveup.is_zero() {
        Duration::from_secs(u64::MAX / 2)
    } else {
        giveup
    });
    tokio::pin!(giveup_sleep);

    let mut last_error: Option<DispatchError> = None;
    loop {
        tokio::select! {
            biased;
            _ = async { ticker.as_mut().unwrap().tick().await }, if ticker.is_some() => {
                debug!("retry tick, spawning another hedged attempt");
                spawn_attempt!();
            }
            result = results_rx.recv() => {
                match result {
                    Some((clone, None)) => {
                        receptacle.merge(clone);
                        return Ok(());
                    }
                    Some((_, Some(err))) => {
                        warn!(error = %err, "hedged attempt failed, keeping last error");
                        last_error = Some(err);
                    }
                    None => {
                        // Every spawned attempt has released its sender; nothing left
                        // to wait on. Only reachable if every attempt panicked.
                        return Err(last_error.unwrap_or(DispatchError::TimedOut));
                    }
                }
            }
            _ = &mut giveup_sleep, if !giveup.is_zero() => {
                debug!("giveup deadline elapsed");
                if last_error.is_none() {
                    if let Some(m) = &metrics {
                        m.hedge_attempts
                            .get_or_create(&SendOutcome { outcome: Outcome::TimedOut })
                            .inc();
                    }
                }
                return Err(last_error.unwrap_or(DispatchError::TimedOut));
            }
        }
    }
}

/// `SendOnce(giveup, requestInfo?, methodName, input, outputReceptacle) ->
/// error` (spec.md §6): no hedging, no retries, one instance attempt bounded
/// by `giveup`.
#[instrument(skip_all, fields(method))]
pub async fn send_once<T, R>(
    mux: &MuxHandle<T>,
    giveup: Duration,
    request_info: Option<RequestInfo>,
    method: &str,
    input: &impl Serialize,
    receptacle: &mut R,
) -> Result<(), DispatchError>
where
    T: RpcTransport + Clone,
    R: Receptacle,
{
    let input_bytes = BincodeCodec::encode(input)?;
    let request_info = request_info.unwrap_or_else(RequestInfo::generate);
    let method = method.to_string();
    let clone_blank = receptacle.blank();

    let attempt = single_attempt(mux.clone(), request_info, method, input_bytes, clone_blank);

    let clone = if giveup.is_zero() {
        attempt.await?
    } else {
        match tokio::time::timeout(giveup, attempt).await {
            Ok(result) => result?,
            Err(_) => return Err(DispatchError::TimedOut),
        }
    };
    receptacle.merge(clone);
    Ok(())
}

async fn single_attempt<T, C>(
    mux: MuxHandle<T>,
    request_info: RequestInfo,
    method: String,
    input: Vec<u8>,
    mut clone: C,
) -> Result<C, DispatchError>
where
    T: RpcTransport + Clone,
    C: serde::de::DeserializeOwned,
{
    let pool = mux.request_instance(HashSet::new()).await;
    let mut handle = pool.pool.acquire().await?;
    let envelope = RequestEnvelope {
        request_info,
        method,
        input,
    };
    let response = handle.forward(envelope).await?;
    clone = BincodeCodec::decode(&response.output)?;
    Ok(clone)
}

/// Per-attempt task body (spec.md §4.5 "Per-attempt task"). Never touches
/// the caller's receptacle directly — only the owned `clone` it was handed.
#[allow(clippy::too_many_arguments)]
fn spawn_attempt_task<T, C>(
    mux: MuxHandle<T>,
    exclusion: Arc<AsyncMutex<HashSet<String>>>,
    request_info: Arc<RequestInfo>,
    method: Arc<str>,
    input: Vec<u8>,
    mut clone: C,
    results: mpsc::UnboundedSender<(C, Option<DispatchError>)>,
    metrics: Option<Arc<ClientMetrics>>,
) where
    T: RpcTransport + Clone,
    C: Send + serde::de::DeserializeOwned + 'static,
{
    let span = tracing::debug_span!("hedge-attempt");
    tokio::spawn(
        async move {
            if let Some(m) = &metrics {
                m.hedge_attempts
                    .get_or_create(&SendOutcome {
                        outcome: Outcome::Attempt,
                    })
                    .inc();
            }

            let excluded = exclusion.lock().await.clone();
            let pool = mux.request_instance(excluded).await;
            let address = pool.instance.address.clone();
            exclusion.lock().await.insert(address.clone());

            let outcome = run_attempt(&pool, &request_info, &method, &input, &mut clone).await;

            // Subsequent ticks may reuse this instance if nothing else is
            // available (spec.md §4.5 step 3).
            exclusion.lock().await.remove(&address);

            if let Some(m) = &metrics {
                let kind = if outcome.is_ok() {
                    Outcome::Success
                } else {
                    Outcome::Error
                };
                m.hedge_attempts
                    .get_or_create(&SendOutcome { outcome: kind })
                    .inc();
            }

            // A dropped receiver (controller already returned via the giveup
            // timer) just means this late result is discarded, per spec.md §5.
            let _ = results.send((clone, outcome.err()));
        }
        .instrument(span),
    );
}

async fn run_attempt<T, C>(
    pool: &crate::mux::ServicePool<T>,
    request_info: &RequestInfo,
    method: &str,
    input: &[u8],
    clone: &mut C,
) -> Result<(), DispatchError>
where
    T: RpcTransport,
    C: serde::de::DeserializeOwned,
{
    let mut handle = pool.pool.acquire().await?;
    let envelope = RequestEnvelope {
        request_info: request_info.clone(),
        method: method.to_string(),
        input: input.to_vec(),
    };
    let response = handle.forward(envelope).await?;
    *clone = BincodeCodec::decode(&response.output)?;
    Ok(())
}

