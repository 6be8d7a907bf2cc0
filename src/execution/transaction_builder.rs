// DANS : src/execution/transaction_builder.rs

use async_trait::async_trait;
use solana_sdk::{
    message::{v0, VersionedMessage},
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::sync::Arc;

use crate::execution::errors::ExecuteError;
use crate::execution::types::{FreshnessWindow, TransactionRequest};

/// Compile une demande et une fenêtre de fraîcheur en transaction signable.
///
/// On produit systématiquement un message v0 (avec compression par tables de
/// correspondance quand la demande en fournit): une seule représentation de
/// transaction circule dans tout le pipeline, le Signer opère uniformément
/// dessus. Les emplacements de signature sont initialisés à zéro; l'emplacement
/// 0 (le payeur) devient l'identifiant unique de la transaction une fois signé.
pub fn compile_transaction(
    request: &TransactionRequest,
    window: &FreshnessWindow,
) -> Result<VersionedTransaction, ExecuteError> {
    let message = v0::Message::try_compile(
        &request.fee_payer,
        &request.instructions,
        &request.lookup_tables,
        window.blockhash,
    )
    .map_err(|e| ExecuteError::Config(format!("compilation du message impossible: {e}")))?;

    let message = VersionedMessage::V0(message);
    let signatures = vec![Signature::default(); message.header().num_required_signatures as usize];
    Ok(VersionedTransaction {
        signatures,
        message,
    })
}

/// Applique les signataires détenus localement (signature partielle). Chaque clé
/// doit correspondre à un emplacement de signataire requis du message; la
/// signature du payeur reste l'affaire du Signer externe.
pub fn apply_partial_signers(
    transaction: &mut VersionedTransaction,
    signers: &[Arc<Keypair>],
) -> Result<(), ExecuteError> {
    if signers.is_empty() {
        return Ok(());
    }

    let message_bytes = transaction.message.serialize();
    let required = transaction.message.header().num_required_signatures as usize;
    let keys = transaction.message.static_account_keys();

    for keypair in signers {
        let position = keys
            .iter()
            .take(required)
            .position(|key| *key == keypair.pubkey())
            .ok_or_else(|| {
                ExecuteError::Signing(format!(
                    "le signataire partiel {} n'est pas un signataire requis du message",
                    keypair.pubkey()
                ))
            })?;
        transaction.signatures[position] = keypair.sign_message(&message_bytes);
    }
    Ok(())
}

/// Le contrat de signature consommé par le pipeline. L'implémentation peut
/// déléguer à un wallet externe ou matériel; elle doit rendre autant de
/// transactions qu'elle en reçoit, dans le même ordre.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(
        &self,
        transaction: VersionedTransaction,
    ) -> Result<VersionedTransaction, ExecuteError>;

    /// Signature en lot, en un seul appel: c'est ce qui permet les flux
    /// d'approbation multi-transactions des wallets.
    async fn sign_all(
        &self,
        transactions: Vec<VersionedTransaction>,
    ) -> Result<Vec<VersionedTransaction>, ExecuteError> {
        let mut signed = Vec::with_capacity(transactions.len());
        for transaction in transactions {
            signed.push(self.sign(transaction).await?);
        }
        Ok(signed)
    }
}

/// Signer local adossé à des paires de clés en mémoire.
pub struct LocalSigner {
    keypairs: Vec<Arc<Keypair>>,
}

impl LocalSigner {
    pub fn new(keypairs: Vec<Arc<Keypair>>) -> Self {
        Self { keypairs }
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    async fn sign(
        &self,
        mut transaction: VersionedTransaction,
    ) -> Result<VersionedTransaction, ExecuteError> {
        let message_bytes = transaction.message.serialize();
        let required = transaction.message.header().num_required_signatures as usize;
        let keys: Vec<_> = transaction
            .message
            .static_account_keys()
            .iter()
            .take(required)
            .cloned()
            .collect();

        for (position, key) in keys.iter().enumerate() {
            if transaction.signatures[position] != Signature::default() {
                // Déjà signé (signataire partiel appliqué en amont).
                continue;
            }
            let keypair = self
                .keypairs
                .iter()
                .find(|kp| kp.pubkey() == *key)
                .ok_or_else(|| {
                    ExecuteError::Signing(format!("aucune clé locale pour le signataire requis {key}"))
                })?;
            transaction.signatures[position] = keypair.sign_message(&message_bytes);
        }
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{hash::Hash, pubkey::Pubkey, system_instruction};

    fn window() -> FreshnessWindow {
        FreshnessWindow {
            blockhash: Hash::new_unique(),
            last_valid_block_height: 1_000,
        }
    }

    #[test]
    fn test_compilation_v0_et_emplacements_de_signature() {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let request = TransactionRequest::new(vec![ix], payer.pubkey()).unwrap();

        let transaction = compile_transaction(&request, &window()).unwrap();
        assert!(matches!(transaction.message, VersionedMessage::V0(_)));
        assert_eq!(transaction.signatures.len(), 1);
        assert_eq!(transaction.signatures[0], Signature::default());
    }

    #[tokio::test]
    async fn test_signer_local_remplit_l_emplacement_zero() {
        let payer = Arc::new(Keypair::new());
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let request = TransactionRequest::new(vec![ix], payer.pubkey()).unwrap();
        let transaction = compile_transaction(&request, &window()).unwrap();

        let signer = LocalSigner::new(vec![payer]);
        let signed = signer.sign(transaction).await.unwrap();
        assert_ne!(signed.signatures[0], Signature::default());
    }

    #[tokio::test]
    async fn test_signer_local_cle_manquante() {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let request = TransactionRequest::new(vec![ix], payer.pubkey()).unwrap();
        let transaction = compile_transaction(&request, &window()).unwrap();

        let signer = LocalSigner::new(vec![Arc::new(Keypair::new())]);
        let result = signer.sign(transaction).await;
        assert!(matches!(result, Err(ExecuteError::Signing(_))));
    }

    #[tokio::test]
    async fn test_sign_all_preserve_ordre_et_cardinalite() {
        let payer = Arc::new(Keypair::new());
        let mut transactions = Vec::new();
        for lamports in 1..=3 {
            let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), lamports);
            let request = TransactionRequest::new(vec![ix], payer.pubkey()).unwrap();
            transactions.push(compile_transaction(&request, &window()).unwrap());
        }
        let messages: Vec<_> = transactions.iter().map(|tx| tx.message.serialize()).collect();

        let signer = LocalSigner::new(vec![payer]);
        let signed = signer.sign_all(transactions).await.unwrap();
        assert_eq!(signed.len(), 3);
        for (signed_tx, original_message) in signed.iter().zip(messages.iter()) {
            assert_eq!(&signed_tx.message.serialize(), original_message);
            assert_ne!(signed_tx.signatures[0], Signature::default());
        }
    }

    #[test]
    fn test_signataire_partiel_doit_etre_requis() {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let request = TransactionRequest::new(vec![ix], payer.pubkey()).unwrap();
        let mut transaction = compile_transaction(&request, &window()).unwrap();

        let stranger = Arc::new(Keypair::new());
        let result = apply_partial_signers(&mut transaction, &[stranger]);
        assert!(matches!(result, Err(ExecuteError::Signing(_))));
    }

    #[test]
    fn test_signataire_partiel_applique() {
        let payer = Keypair::new();
        let extra = Arc::new(Keypair::new());
        // Deux signataires requis: le payeur et le compte source du second transfert.
        let ix_a = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let ix_b = system_instruction::transfer(&extra.pubkey(), &Pubkey::new_unique(), 1);
        let request = TransactionRequest::new(vec![ix_a, ix_b], payer.pubkey()).unwrap();
        let mut transaction = compile_transaction(&request, &window()).unwrap();
        assert_eq!(transaction.signatures.len(), 2);

        apply_partial_signers(&mut transaction, &[extra.clone()]).unwrap();
        // L'emplacement du payeur (0) reste vide, celui du signataire partiel est rempli.
        assert_eq!(transaction.signatures[0], Signature::default());
        assert_ne!(transaction.signatures[1], Signature::default());
    }
}
