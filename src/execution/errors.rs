// DANS : src/execution/errors.rs

use solana_client::client_error::ClientError;
use solana_sdk::transaction::TransactionError;
use std::collections::HashMap;
use thiserror::Error;

use crate::rpc::ResilientRpcClient;

/// La taxonomie d'erreurs exposée aux appelants du pipeline.
///
/// Les erreurs transitoires (blockhash introuvable, coupure réseau) sont
/// ré-essayées silencieusement dans la boucle d'envoi et n'apparaissent ici
/// que si le budget de ré-essais est épuisé.
#[derive(Error, Debug)]
pub enum ExecuteError {
    /// Demande malformée (instructions vides, lot vide...). Détectée avant tout appel réseau.
    #[error("configuration invalide: {0}")]
    Config(String),

    /// La simulation a été rejetée par le réseau: la transaction est structurellement
    /// invalide, on ne ré-essaie pas.
    #[error("échec de simulation: {0}")]
    Simulation(String),

    /// Agrégat des échecs de simulation d'un lot, indexés par position de la demande.
    /// Levé à la place de toute erreur individuelle: on ne diffuse jamais un lot
    /// partiellement valide.
    #[error("échecs de simulation dans le lot: {}", format_batch_failures(.0))]
    BatchSimulation(Vec<(usize, String)>),

    /// Classification normalisée des variantes "fonds insuffisants" du réseau.
    #[error("fonds insuffisants pour payer la transaction ({detail})")]
    InsufficientFunds { detail: String },

    /// La boucle d'envoi a atteint la borne de hauteur de bloc sans confirmation.
    /// Terminal: la transaction est expirée.
    #[error("hauteur de bloc limite atteinte, la transaction a expiré")]
    BlockHeightExceeded,

    /// Le suivi de confirmation a dépassé son budget mural.
    #[error("confirmation non obtenue avant le délai de {0} ms")]
    ConfirmationTimeout(u64),

    /// La transaction a été incluse mais son exécution on-chain a échoué.
    #[error("échec on-chain: {0}")]
    OnChain(String),

    /// Budget de diffusions épuisé sans aucun envoi accepté.
    #[error("nombre maximal de diffusions atteint ({0}) sans envoi accepté")]
    RetriesExhausted(u32),

    /// Le Signer n'a pas pu (ou pas voulu) signer.
    #[error("échec de signature: {0}")]
    Signing(String),

    /// Erreur de transport RPC non récupérable.
    #[error("erreur RPC: {0}")]
    Rpc(String),

    /// L'opération a été annulée par le coordinateur (l'autre branche a terminé).
    #[error("opération annulée")]
    Cancelled,

    /// Défaillance interne (tâche tokio avortée...).
    #[error("erreur interne: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ExecuteError {
    fn from(e: anyhow::Error) -> Self {
        ExecuteError::Rpc(format!("{e:#}"))
    }
}

fn format_batch_failures(failures: &[(usize, String)]) -> String {
    failures
        .iter()
        .map(|(index, message)| format!("[{index}] {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Issue de la classification d'une erreur de diffusion.
#[derive(Debug)]
pub enum SendErrorKind {
    /// La transaction a déjà été traitée par le réseau: fin bénigne de la boucle
    /// d'envoi, ce n'est PAS une erreur.
    AlreadyProcessed,
    /// Le blockhash n'est pas (encore) connu du nœud: transitoire, on ré-essaie.
    BlockhashNotFound,
    /// Erreur de transport temporaire: on ré-essaie.
    Transient,
    /// Erreur définitive, classifiée pour l'appelant.
    Fatal(ExecuteError),
}

/// Traduit une erreur réseau brute en erreur lisible, à l'aide d'une table
/// d'erreurs spécifique au programme appelé, puis la classifie.
///
/// La classification par sous-chaînes est une fragilité connue: on préfère les
/// erreurs typées du client quand elles existent (voir `classify_send_error`),
/// et on ne retombe sur le texte que pour les réponses non typées.
#[derive(Debug, Clone, Default)]
pub struct ErrorTranslator {
    program_errors: HashMap<u32, String>,
}

impl ErrorTranslator {
    pub fn new(program_errors: HashMap<u32, String>) -> Self {
        Self { program_errors }
    }

    pub fn with_error(mut self, code: u32, message: impl Into<String>) -> Self {
        self.program_errors.insert(code, message.into());
        self
    }

    /// Remplace un "custom program error: 0xNN" par le texte de la table quand
    /// le code y figure; sinon retourne le texte brut inchangé.
    pub fn translate(&self, raw: &str) -> String {
        if let Some(code) = parse_custom_error_code(raw) {
            if let Some(message) = self.program_errors.get(&code) {
                return format!("{message} (code 0x{code:x})");
            }
        }
        raw.to_string()
    }

    /// Classifie une erreur rapportée par la simulation.
    pub fn classify_simulation(&self, raw: &str) -> ExecuteError {
        let translated = self.translate(raw);
        if is_insufficient_funds(raw) {
            ExecuteError::InsufficientFunds { detail: translated }
        } else {
            ExecuteError::Simulation(translated)
        }
    }

    /// Classifie une erreur d'exécution on-chain (statut de confirmation en échec).
    pub fn classify_onchain(&self, raw: &str) -> ExecuteError {
        let translated = self.translate(raw);
        if is_insufficient_funds(raw) {
            ExecuteError::InsufficientFunds { detail: translated }
        } else {
            ExecuteError::OnChain(translated)
        }
    }

    /// Classifie un rejet typé de `sendTransaction`. La transaction n'a jamais
    /// été incluse: le rejet n'est donc pas une erreur on-chain.
    pub fn classify_send_rejection(&self, raw: &str) -> ExecuteError {
        let translated = self.translate(raw);
        if is_insufficient_funds(raw) {
            ExecuteError::InsufficientFunds { detail: translated }
        } else {
            ExecuteError::Rpc(format!("transaction rejetée à l'envoi: {translated}"))
        }
    }
}

/// Extrait le code de "custom program error: 0xNN" s'il est présent.
fn parse_custom_error_code(raw: &str) -> Option<u32> {
    let lowered = raw.to_ascii_lowercase();
    let position = lowered.find("custom program error: 0x")?;
    let hex = &raw[position + "custom program error: 0x".len()..];
    let end = hex
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(hex.len());
    u32::from_str_radix(&hex[..end], 16).ok()
}

/// Détecte les formulations connues de "fonds insuffisants", quelle que soit
/// la variante exacte renvoyée par le réseau.
fn is_insufficient_funds(raw: &str) -> bool {
    let lowered = raw.to_ascii_lowercase();
    lowered.contains("insufficient funds")
        || lowered.contains("insufficient lamports")
        || lowered.contains("no record of a prior credit")
        || parse_custom_error_code(raw) == Some(0x1)
}

/// Classifie une erreur de `sendTransaction`. On s'appuie d'abord sur l'erreur
/// de transaction typée portée par le client; le texte ne sert que de repli.
pub fn classify_send_error(error: &ClientError, translator: &ErrorTranslator) -> SendErrorKind {
    if let Some(tx_error) = error.get_transaction_error() {
        return match tx_error {
            TransactionError::AlreadyProcessed => SendErrorKind::AlreadyProcessed,
            TransactionError::BlockhashNotFound => SendErrorKind::BlockhashNotFound,
            other => SendErrorKind::Fatal(translator.classify_send_rejection(&other.to_string())),
        };
    }

    let message = error.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("already been processed") {
        SendErrorKind::AlreadyProcessed
    } else if lowered.contains("blockhash not found") {
        SendErrorKind::BlockhashNotFound
    } else if ResilientRpcClient::is_retryable(error) {
        SendErrorKind::Transient
    } else if is_insufficient_funds(&message) {
        SendErrorKind::Fatal(ExecuteError::InsufficientFunds {
            detail: translator.translate(&message),
        })
    } else {
        SendErrorKind::Fatal(ExecuteError::Rpc(message))
    }
}
