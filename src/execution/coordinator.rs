// DANS : src/execution/coordinator.rs

use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::execution::confirmation_service::ConfirmationWatcher;
use crate::execution::errors::{ErrorTranslator, ExecuteError};
use crate::execution::sender::ReliableSender;
use crate::execution::types::{ExecutionOptions, FreshnessWindow};
use crate::monitoring::metrics;
use crate::rpc::ResilientRpcClient;

/// Signal d'annulation coopératif partagé entre la boucle d'envoi et le suivi
/// de confirmation. Chaque tâche l'observe à ses points de suspension et
/// s'arrête promptement dès qu'il est levé.
#[derive(Clone)]
pub struct CancelToken {
    signal: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self {
            signal: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Se résout quand le signal est levé. Utilisable dans un `tokio::select!`.
    pub async fn cancelled(&self) {
        let mut receiver = self.signal.subscribe();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// La machine à états d'une transaction: la boucle d'envoi et le suivi de
/// confirmation courent en parallèle depuis le même point de départ, et le
/// premier état terminal atteint décide de l'issue.
///
/// Règles d'arbitrage:
/// - le suivi de confirmation qui termine (succès ou échec) annule l'envoi;
/// - un échec terminal de l'envoi (expiration, budget épuisé, erreur fatale)
///   annule le suivi et décide de l'issue;
/// - une fin bénigne de l'envoi (transaction livrée / déjà traitée) ne décide
///   rien: le coordinateur continue d'attendre le suivi, qui porte le timeout.
/// Dans tous les cas, le coordinateur attend la fin des deux tâches avant de
/// retourner: aucun travail de fond ne survit à l'appel.
pub struct ExecutionCoordinator {
    rpc_client: Arc<ResilientRpcClient>,
    translator: ErrorTranslator,
}

impl ExecutionCoordinator {
    pub fn new(rpc_client: Arc<ResilientRpcClient>, translator: ErrorTranslator) -> Self {
        Self {
            rpc_client,
            translator,
        }
    }

    pub async fn run(
        &self,
        transaction: VersionedTransaction,
        window: FreshnessWindow,
        options: ExecutionOptions,
    ) -> Result<Signature, ExecuteError> {
        // L'identifiant unique de la transaction est sa signature d'emplacement 0.
        let signature = transaction.signatures[0];
        if signature == Signature::default() {
            return Err(ExecuteError::Signing(
                "transaction non signée: l'emplacement de signature 0 est vide".to_string(),
            ));
        }

        let cancel = CancelToken::new();

        let mut send_handle: JoinHandle<Result<(), ExecuteError>> = tokio::spawn({
            let sender = ReliableSender::new(self.rpc_client.clone(), self.translator.clone());
            let transaction = transaction.clone();
            let options = options.clone();
            let cancel = cancel.clone();
            async move {
                sender
                    .send_until_deadline(&transaction, &window, &options, cancel)
                    .await
            }
        });

        let mut confirm_handle: JoinHandle<Result<Signature, ExecuteError>> = tokio::spawn({
            let watcher = ConfirmationWatcher::new(self.rpc_client.clone(), self.translator.clone());
            let options = options.clone();
            let cancel = cancel.clone();
            async move { watcher.wait_for_confirmation(signature, &options, cancel).await }
        });

        let outcome = tokio::select! {
            send_result = &mut send_handle => {
                match flatten(send_result) {
                    // Fin bénigne de l'envoi: la confirmation décide.
                    Ok(()) => {
                        debug!(%signature, "Boucle d'envoi terminée, en attente de la confirmation.");
                        flatten(confirm_handle.await)
                    }
                    Err(error) => {
                        cancel.cancel();
                        let _ = confirm_handle.await;
                        Err(error)
                    }
                }
            }
            confirm_result = &mut confirm_handle => {
                cancel.cancel();
                let _ = send_handle.await;
                flatten(confirm_result)
            }
        };

        metrics::TRANSACTION_OUTCOMES
            .with_label_values(&[outcome_label(&outcome)])
            .inc();
        outcome
    }
}

pub(crate) fn flatten<T>(
    joined: Result<Result<T, ExecuteError>, tokio::task::JoinError>,
) -> Result<T, ExecuteError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(ExecuteError::Internal(format!("tâche interrompue: {e}"))),
    }
}

fn outcome_label(outcome: &Result<Signature, ExecuteError>) -> &'static str {
    match outcome {
        Ok(_) => "confirmed",
        Err(ExecuteError::BlockHeightExceeded) => "expired",
        Err(ExecuteError::ConfirmationTimeout(_)) => "timeout",
        Err(ExecuteError::InsufficientFunds { .. }) => "insufficient_funds",
        Err(_) => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_token_reveille_les_observateurs() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let observer = token.clone();
        let waiter = tokio::spawn(async move {
            observer.cancelled().await;
            true
        });

        // L'observateur ne doit pas se réveiller spontanément.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        token.cancel();
        assert!(token.is_cancelled());
        let woke = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(woke);
    }

    #[tokio::test]
    async fn test_cancel_token_deja_leve() {
        let token = CancelToken::new();
        token.cancel();
        // `cancelled` doit se résoudre immédiatement.
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_timeout_de_confirmation_decide_et_annule_l_envoi() {
        use solana_sdk::signer::Signer;

        // Endpoint mort: chaque diffusion échoue de façon transitoire et les
        // statuts sont indisponibles. Seul le budget mural de la confirmation
        // peut trancher; le coordinateur doit ensuite rendre la main sans
        // laisser la boucle d'envoi tourner en fond.
        let rpc = Arc::new(ResilientRpcClient::new("http://127.0.0.1:1".to_string(), 0, 1));
        let coordinator = ExecutionCoordinator::new(rpc, ErrorTranslator::default());

        let payer = solana_sdk::signature::Keypair::new();
        let ix = solana_sdk::system_instruction::transfer(
            &payer.pubkey(),
            &solana_sdk::pubkey::Pubkey::new_unique(),
            1,
        );
        let request =
            crate::execution::types::TransactionRequest::new(vec![ix], payer.pubkey()).unwrap();
        let window = FreshnessWindow {
            blockhash: solana_sdk::hash::Hash::new_unique(),
            last_valid_block_height: u64::MAX,
        };
        let mut transaction =
            crate::execution::transaction_builder::compile_transaction(&request, &window).unwrap();
        transaction.signatures[0] = payer.sign_message(&transaction.message.serialize());

        let options = ExecutionOptions {
            confirmation_timeout_ms: 50,
            send_interval_ms: 10,
            ..Default::default()
        };

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.run(transaction, window, options),
        )
        .await
        .expect("le coordinateur doit terminer, pas rester bloqué");
        assert!(matches!(result, Err(ExecuteError::ConfirmationTimeout(_))));
    }

    #[tokio::test]
    async fn test_transaction_non_signee_refusee() {
        let rpc = Arc::new(ResilientRpcClient::new("http://127.0.0.1:1".to_string(), 0, 1));
        let coordinator = ExecutionCoordinator::new(rpc, ErrorTranslator::default());

        let payer = solana_sdk::signature::Keypair::new();
        let ix = solana_sdk::system_instruction::transfer(
            &solana_sdk::signer::Signer::pubkey(&payer),
            &solana_sdk::pubkey::Pubkey::new_unique(),
            1,
        );
        let request =
            crate::execution::types::TransactionRequest::new(vec![ix], solana_sdk::signer::Signer::pubkey(&payer))
                .unwrap();
        let window = FreshnessWindow {
            blockhash: solana_sdk::hash::Hash::new_unique(),
            last_valid_block_height: 1,
        };
        let transaction =
            crate::execution::transaction_builder::compile_transaction(&request, &window).unwrap();

        let result = coordinator
            .run(transaction, window, ExecutionOptions::default())
            .await;
        assert!(matches!(result, Err(ExecuteError::Signing(_))));
    }
}
