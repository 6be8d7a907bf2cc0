// DANS : src/execution/types.rs

use serde::{Deserialize, Serialize};
use solana_client::rpc_response::RpcSimulateTransactionResult;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    instruction::Instruction,
    message::AddressLookupTableAccount,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::VersionedTransaction,
};
use std::fmt;
use std::sync::Arc;

use crate::execution::errors::ExecuteError;

/// Niveau de priorité demandé pour l'inclusion de la transaction.
/// Chaque niveau porte son multiplicateur, son sens d'arrondi et son frais
/// de repli (voir `fee_manager`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// La fenêtre de fraîcheur d'une transaction: un blockhash récent et la hauteur
/// de bloc au-delà de laquelle il n'est plus accepté. C'est la date limite dure
/// de toutes les boucles de ré-envoi.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Options d'exécution reconnues par le pipeline. Tous les champs ont un défaut
/// raisonnable; `Default` suffit pour un envoi standard.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub priority_level: PriorityLevel,
    /// Plafond global des frais de priorité, en lamports. `None` = pas de plafond.
    pub max_priority_fee_lamports: Option<u64>,
    /// Frais de priorité exacts en lamports; court-circuite l'estimation.
    pub exact_priority_fee_lamports: Option<u64>,
    /// Pause entre deux diffusions de la même transaction.
    pub send_interval_ms: u64,
    /// Nombre maximal de diffusions. `None` = illimité (borné par la fenêtre de fraîcheur).
    pub max_send_retries: Option<u32>,
    /// Budget mural accordé à la confirmation.
    pub confirmation_timeout_ms: u64,
    pub commitment: CommitmentConfig,
    pub enable_priority_fee: bool,
    /// Marge multiplicative ajoutée au budget de compute units simulé, en pourcent.
    pub cu_margin_percent: u64,
    /// Vérifier les signatures pendant la simulation (exige le Signer en amont).
    /// Le flux de lot force cette vérification, chaque requête ayant ses propres signataires.
    pub verify_signatures_on_simulate: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            priority_level: PriorityLevel::Medium,
            max_priority_fee_lamports: None,
            exact_priority_fee_lamports: None,
            send_interval_ms: 1_000,
            max_send_retries: None,
            confirmation_timeout_ms: 60_000,
            commitment: CommitmentConfig::confirmed(),
            enable_priority_fee: true,
            cu_margin_percent: 10,
            verify_signatures_on_simulate: false,
        }
    }
}

/// Une demande d'exécution: une séquence ordonnée d'instructions, un payeur de
/// frais, et d'éventuels signataires partiels / tables de correspondance.
/// Le payeur est non-nul par construction (c'est une `Pubkey`, pas une option);
/// la liste d'instructions est validée non-vide à la construction.
#[derive(Clone)]
pub struct TransactionRequest {
    pub instructions: Vec<Instruction>,
    pub fee_payer: Pubkey,
    pub partial_signers: Vec<Arc<Keypair>>,
    pub lookup_tables: Vec<AddressLookupTableAccount>,
}

impl TransactionRequest {
    pub fn new(
        instructions: Vec<Instruction>,
        fee_payer: Pubkey,
    ) -> Result<Self, ExecuteError> {
        if instructions.is_empty() {
            return Err(ExecuteError::Config(
                "une demande d'exécution doit contenir au moins une instruction".to_string(),
            ));
        }
        Ok(Self {
            instructions,
            fee_payer,
            partial_signers: Vec::new(),
            lookup_tables: Vec::new(),
        })
    }

    pub fn with_partial_signers(mut self, signers: Vec<Arc<Keypair>>) -> Self {
        self.partial_signers = signers;
        self
    }

    pub fn with_lookup_tables(mut self, tables: Vec<AddressLookupTableAccount>) -> Self {
        self.lookup_tables = tables;
        self
    }
}

impl fmt::Debug for TransactionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keypair ne s'affiche pas: on résume.
        f.debug_struct("TransactionRequest")
            .field("fee_payer", &self.fee_payer)
            .field("instructions", &self.instructions.len())
            .field("partial_signers", &self.partial_signers.len())
            .field("lookup_tables", &self.lookup_tables.len())
            .finish()
    }
}

/// Résultat d'une simulation: unités de calcul consommées (absentes en cas
/// d'échec), erreur d'exécution éventuelle, et logs du programme.
#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub units_consumed: Option<u64>,
    pub error: Option<String>,
    pub logs: Option<Vec<String>>,
}

impl From<RpcSimulateTransactionResult> for SimulationOutcome {
    fn from(value: RpcSimulateTransactionResult) -> Self {
        Self {
            units_consumed: value.units_consumed,
            error: value.err.map(|e| e.to_string()),
            logs: value.logs,
        }
    }
}

/// Le résultat individuel d'une transaction au sein d'un lot: succès (signature)
/// ou échec classifié, toujours rattaché à sa demande d'origine et à la
/// transaction compilée pour inspection par l'appelant.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub request: TransactionRequest,
    pub transaction: VersionedTransaction,
    pub result: Result<Signature, ExecuteError>,
}

impl ExecutionOutcome {
    pub fn is_fulfilled(&self) -> bool {
        self.result.is_ok()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.result.as_ref().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::system_instruction;

    #[test]
    fn test_requete_sans_instruction_refusee() {
        let result = TransactionRequest::new(vec![], Pubkey::new_unique());
        assert!(matches!(result, Err(ExecuteError::Config(_))));
    }

    #[test]
    fn test_requete_valide() {
        let payer = Pubkey::new_unique();
        let ix = system_instruction::transfer(&payer, &Pubkey::new_unique(), 1);
        let request = TransactionRequest::new(vec![ix], payer).unwrap();
        assert_eq!(request.fee_payer, payer);
        assert_eq!(request.instructions.len(), 1);
    }

    #[test]
    fn test_options_par_defaut() {
        let options = ExecutionOptions::default();
        assert_eq!(options.priority_level, PriorityLevel::Medium);
        assert_eq!(options.send_interval_ms, 1_000);
        assert!(options.max_send_retries.is_none());
        assert!(options.enable_priority_fee);
        assert_eq!(options.cu_margin_percent, 10);
    }
}
