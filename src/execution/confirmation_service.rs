// DANS : src/execution/confirmation_service.rs

use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::execution::coordinator::CancelToken;
use crate::execution::errors::{ErrorTranslator, ExecuteError};
use crate::execution::types::ExecutionOptions;
use crate::monitoring::metrics;
use crate::rpc::ResilientRpcClient;

// Cadence d'interrogation du statut d'une transaction.
const CONFIRMATION_POLL_INTERVAL_MS: u64 = 1_000;

/// Le suivi de confirmation: interroge le statut de la transaction jusqu'à la
/// finalité demandée, une erreur on-chain, l'épuisement de son budget mural,
/// ou l'annulation par le coordinateur.
pub struct ConfirmationWatcher {
    rpc_client: Arc<ResilientRpcClient>,
    translator: ErrorTranslator,
}

impl ConfirmationWatcher {
    pub fn new(rpc_client: Arc<ResilientRpcClient>, translator: ErrorTranslator) -> Self {
        Self {
            rpc_client,
            translator,
        }
    }

    pub async fn wait_for_confirmation(
        &self,
        signature: Signature,
        options: &ExecutionOptions,
        cancel: CancelToken,
    ) -> Result<Signature, ExecuteError> {
        let started_at = Instant::now();
        let deadline = started_at + Duration::from_millis(options.confirmation_timeout_ms);
        let mut poll = interval(Duration::from_millis(CONFIRMATION_POLL_INTERVAL_MS));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecuteError::Cancelled),
                _ = poll.tick() => {}
            }

            if Instant::now() >= deadline {
                warn!(%signature, timeout_ms = options.confirmation_timeout_ms, "Confirmation non obtenue dans le délai imparti.");
                return Err(ExecuteError::ConfirmationTimeout(
                    options.confirmation_timeout_ms,
                ));
            }

            let statuses = match self.rpc_client.get_signature_statuses(&[signature]).await {
                Ok(response) => response.value,
                Err(e) => {
                    // Interrogation momentanément impossible: on retentera au prochain tick.
                    warn!(%signature, error = %e, "Statut de transaction indisponible.");
                    continue;
                }
            };

            let Some(Some(status)) = statuses.into_iter().next() else {
                debug!(%signature, "Transaction pas encore observée par le nœud.");
                continue;
            };

            if let Some(err) = status.err {
                // Échec d'exécution on-chain: immédiatement terminal.
                return Err(self.translator.classify_onchain(&err.to_string()));
            }

            if status.satisfies_commitment(options.commitment) {
                metrics::CONFIRMATION_LATENCY.observe(started_at.elapsed().as_secs_f64());
                debug!(%signature, elapsed_ms = started_at.elapsed().as_millis() as u64, "Transaction confirmée.");
                return Ok(signature);
            }

            debug!(%signature, "Transaction observée mais commitment insuffisant.");
        }
    }
}
