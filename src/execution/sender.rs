// DANS : src/execution/sender.rs

use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::execution::coordinator::CancelToken;
use crate::execution::errors::{classify_send_error, ErrorTranslator, ExecuteError, SendErrorKind};
use crate::execution::types::{ExecutionOptions, FreshnessWindow};
use crate::monitoring::metrics;
use crate::rpc::ResilientRpcClient;

/// La boucle d'envoi fiable: re-diffuse la transaction brute jusqu'à ce que la
/// confirmation soit observée ailleurs (signal d'annulation), que le réseau
/// réponde "déjà traitée", que le budget de diffusions soit épuisé, ou que la
/// fenêtre de fraîcheur expire.
pub struct ReliableSender {
    rpc_client: Arc<ResilientRpcClient>,
    translator: ErrorTranslator,
}

impl ReliableSender {
    pub fn new(rpc_client: Arc<ResilientRpcClient>, translator: ErrorTranslator) -> Self {
        Self {
            rpc_client,
            translator,
        }
    }

    /// `Ok(())` signifie une fin bénigne de la boucle (livraison effectuée ou
    /// annulation par le coordinateur): c'est alors le suivi de confirmation
    /// qui décide du sort de la transaction. Les `Err` sont terminaux.
    pub async fn send_until_deadline(
        &self,
        transaction: &VersionedTransaction,
        window: &FreshnessWindow,
        options: &ExecutionOptions,
        cancel: CancelToken,
    ) -> Result<(), ExecuteError> {
        // Le préflight a déjà été fait par l'étape de simulation explicite;
        // le relancer à chaque diffusion ne ferait que ralentir la boucle.
        let send_config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(0),
            ..Default::default()
        };
        let signature = transaction.signatures[0];

        let mut attempts: u32 = 0;
        let mut delivered = false;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            attempts += 1;
            match self
                .rpc_client
                .send_transaction_no_retry(transaction, send_config.clone())
                .await
            {
                Ok(_) => {
                    delivered = true;
                    metrics::TRANSACTIONS_SENT.inc();
                    debug!(%signature, attempts, "Transaction diffusée.");
                }
                Err(e) => match classify_send_error(&e, &self.translator) {
                    SendErrorKind::AlreadyProcessed => {
                        // Livraison déjà effectuée: fin bénigne, la confirmation tranche.
                        debug!(%signature, "Le réseau a déjà traité la transaction.");
                        return Ok(());
                    }
                    SendErrorKind::BlockhashNotFound => {
                        metrics::SEND_TRANSIENT_ERRORS.inc();
                        debug!(%signature, attempts, "Blockhash pas encore connu du nœud, on ré-essaiera.");
                    }
                    SendErrorKind::Transient => {
                        metrics::SEND_TRANSIENT_ERRORS.inc();
                        warn!(%signature, attempts, error = %e, "Erreur réseau temporaire pendant la diffusion.");
                    }
                    SendErrorKind::Fatal(error) => {
                        warn!(%signature, attempts, error = %error, "Erreur de diffusion définitive.");
                        return Err(error);
                    }
                },
            }

            if let Some(max_retries) = options.max_send_retries {
                if attempts > max_retries {
                    // Si au moins une diffusion a été acceptée, la transaction est
                    // dans le réseau: laisser la confirmation décider.
                    if delivered {
                        return Ok(());
                    }
                    return Err(ExecuteError::RetriesExhausted(max_retries));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep(Duration::from_millis(options.send_interval_ms)) => {}
            }

            // La fenêtre de fraîcheur est la date limite dure de la boucle.
            match self.rpc_client.get_block_height(options.commitment).await {
                Ok(height) if height >= window.last_valid_block_height => {
                    warn!(
                        %signature,
                        height,
                        borne = window.last_valid_block_height,
                        "Fenêtre de fraîcheur expirée sans confirmation."
                    );
                    return Err(ExecuteError::BlockHeightExceeded);
                }
                Ok(_) => {}
                // Hauteur momentanément indisponible: la boucle continue, la
                // borne sera re-vérifiée au prochain tour.
                Err(e) => warn!(%signature, error = %e, "Hauteur de bloc indisponible."),
            }
        }
    }
}
