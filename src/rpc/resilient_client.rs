use anyhow::{Context, Result};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig},
    rpc_response::{Response as RpcResponse, RpcPrioritizationFee, RpcSimulateTransactionResult},
};
use solana_sdk::{
    commitment_config::CommitmentConfig, program_pack::Pack, pubkey::Pubkey, signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::TransactionStatus;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::execution::types::FreshnessWindow;

/// Un "wrapper" autour du RpcClient de Solana qui ajoute une logique de
/// ré-essai automatique pour les appels RPC qui échouent à cause d'erreurs réseau temporaires.
///
/// C'est le seul point de contact du pipeline avec le réseau. La connexion sous-jacente
/// est partagée en lecture par toutes les tâches concurrentes; le cache mint -> decimals
/// est le seul état mutable partagé (insertion uniquement, clé immuable).
#[derive(Clone)]
pub struct ResilientRpcClient {
    client: Arc<RpcClient>,
    max_retries: u8,
    delay_ms: u64,
    // Cache de mémoïsation: un mint ne change jamais de nombre de décimales.
    decimals_cache: Arc<RwLock<HashMap<Pubkey, u8>>>,
}

impl ResilientRpcClient {
    /// Construit un nouveau client RPC résilient.
    pub fn new(rpc_url: String, max_retries: u8, delay_ms: u64) -> Self {
        Self {
            client: Arc::new(RpcClient::new(rpc_url)),
            max_retries,
            delay_ms,
            decimals_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Détermine si une erreur du client est temporaire et si une nouvelle tentative doit être effectuée.
    pub fn is_retryable(error: &ClientError) -> bool {
        matches!(
            error.kind,
            ClientErrorKind::Reqwest(_) | ClientErrorKind::RpcError(_) | ClientErrorKind::Io(_)
        )
    }

    // --- MÉTHODES WRAPPÉES AVEC LOGIQUE DE RÉ-ESSAI ---

    /// Récupère le dernier blockhash et sa hauteur de bloc limite de validité.
    /// Le couple forme la fenêtre de fraîcheur: toute transaction construite dessus
    /// expire quand la hauteur courante atteint la borne.
    pub async fn get_freshness_window(
        &self,
        commitment: CommitmentConfig,
    ) -> Result<FreshnessWindow> {
        for attempt in 0..=self.max_retries {
            match self
                .client
                .get_latest_blockhash_with_commitment(commitment)
                .await
            {
                Ok((blockhash, last_valid_block_height)) => {
                    return Ok(FreshnessWindow {
                        blockhash,
                        last_valid_block_height,
                    });
                }
                Err(e) => {
                    if Self::is_retryable(&e) && attempt < self.max_retries {
                        sleep(Duration::from_millis(self.delay_ms)).await;
                    } else {
                        return Err(e).with_context(|| "Échec final de get_latest_blockhash");
                    }
                }
            }
        }
        unreachable!()
    }

    /// Récupère la hauteur de bloc courante.
    pub async fn get_block_height(&self, commitment: CommitmentConfig) -> Result<u64> {
        for attempt in 0..=self.max_retries {
            match self
                .client
                .get_block_height_with_commitment(commitment)
                .await
            {
                Ok(height) => return Ok(height),
                Err(e) => {
                    if Self::is_retryable(&e) && attempt < self.max_retries {
                        sleep(Duration::from_millis(self.delay_ms)).await;
                    } else {
                        return Err(e).with_context(|| "Échec final de get_block_height");
                    }
                }
            }
        }
        unreachable!()
    }

    /// Simule une transaction.
    pub async fn simulate_transaction_with_config(
        &self,
        transaction: &VersionedTransaction,
        config: RpcSimulateTransactionConfig,
    ) -> Result<RpcResponse<RpcSimulateTransactionResult>> {
        for attempt in 0..=self.max_retries {
            match self
                .client
                .simulate_transaction_with_config(transaction, config.clone())
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if Self::is_retryable(&e) && attempt < self.max_retries {
                        sleep(Duration::from_millis(self.delay_ms)).await;
                    } else {
                        return Err(e)
                            .with_context(|| "Échec final de simulate_transaction_with_config");
                    }
                }
            }
        }
        unreachable!()
    }

    /// Diffuse une transaction brute, SANS ré-essai interne: la politique de ré-envoi
    /// appartient à la boucle d'envoi, qui a besoin de l'erreur `ClientError` d'origine
    /// pour la classifier (déjà traitée, blockhash introuvable, fatale...).
    pub async fn send_transaction_no_retry(
        &self,
        transaction: &VersionedTransaction,
        config: RpcSendTransactionConfig,
    ) -> std::result::Result<Signature, ClientError> {
        self.client
            .send_transaction_with_config(transaction, config)
            .await
    }

    /// Récupère le statut de confirmation d'un lot de signatures.
    pub async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> Result<RpcResponse<Vec<Option<TransactionStatus>>>> {
        for attempt in 0..=self.max_retries {
            match self.client.get_signature_statuses(signatures).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if Self::is_retryable(&e) && attempt < self.max_retries {
                        sleep(Duration::from_millis(self.delay_ms)).await;
                    } else {
                        return Err(e).with_context(|| "Échec final de get_signature_statuses");
                    }
                }
            }
        }
        unreachable!()
    }

    /// Récupère les échantillons récents de frais de priorité pour un ensemble de comptes.
    pub async fn get_recent_prioritization_fees(
        &self,
        accounts: &[Pubkey],
    ) -> Result<Vec<RpcPrioritizationFee>> {
        for attempt in 0..=self.max_retries {
            match self.client.get_recent_prioritization_fees(accounts).await {
                Ok(fees) => return Ok(fees),
                Err(e) => {
                    if Self::is_retryable(&e) && attempt < self.max_retries {
                        sleep(Duration::from_millis(self.delay_ms)).await;
                    } else {
                        return Err(e)
                            .with_context(|| "Échec final de get_recent_prioritization_fees");
                    }
                }
            }
        }
        unreachable!()
    }

    /// Récupère les données brutes d'un compte.
    pub async fn get_account_data(&self, pubkey: &Pubkey) -> Result<Vec<u8>> {
        for attempt in 0..=self.max_retries {
            match self.client.get_account_data(pubkey).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    if Self::is_retryable(&e) && attempt < self.max_retries {
                        sleep(Duration::from_millis(self.delay_ms)).await;
                    } else {
                        return Err(e)
                            .with_context(|| format!("Échec final de get_account_data pour {}", pubkey));
                    }
                }
            }
        }
        unreachable!()
    }

    /// Retourne le nombre de décimales d'un mint SPL, avec mémoïsation.
    /// Le cache vit aussi longtemps que le client et n'est jamais invalidé:
    /// les décimales d'un mint sont immuables.
    pub async fn get_mint_decimals(&self, mint: &Pubkey) -> Result<u8> {
        {
            let reader = self.decimals_cache.read().await;
            if let Some(decimals) = reader.get(mint) {
                return Ok(*decimals);
            }
        }

        let data = self.get_account_data(mint).await?;
        let slice = data
            .get(..spl_token::state::Mint::LEN)
            .with_context(|| format!("Données de mint trop courtes pour {}", mint))?;
        let state = spl_token::state::Mint::unpack_from_slice(slice)
            .with_context(|| format!("Décodage du mint {} impossible", mint))?;

        let mut writer = self.decimals_cache.write().await;
        writer.insert(*mint, state.decimals);
        Ok(state.decimals)
    }

    #[cfg(test)]
    pub(crate) async fn prime_decimals(&self, mint: Pubkey, decimals: u8) {
        self.decimals_cache.write().await.insert(mint, decimals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Endpoint fermé: toute requête échoue immédiatement (connexion refusée).
    fn dead_client() -> ResilientRpcClient {
        ResilientRpcClient::new("http://127.0.0.1:1".to_string(), 0, 1)
    }

    #[tokio::test]
    async fn test_decimals_cache_hit_evite_le_reseau() {
        let client = dead_client();
        let mint = Pubkey::new_unique();
        client.prime_decimals(mint, 6).await;

        // L'endpoint est mort: seule une lecture du cache peut répondre.
        let decimals = client.get_mint_decimals(&mint).await.unwrap();
        assert_eq!(decimals, 6);
    }

    #[tokio::test]
    async fn test_decimals_cache_miss_echoue_sans_reseau() {
        let client = dead_client();
        let mint = Pubkey::new_unique();
        assert!(client.get_mint_decimals(&mint).await.is_err());
    }
}
