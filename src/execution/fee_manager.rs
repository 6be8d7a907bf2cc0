// DANS : src/execution/fee_manager.rs

use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::execution::types::PriorityLevel;
use crate::monitoring::metrics;
use crate::rpc::ResilientRpcClient;

// Politique par niveau. Le couple multiplicateur/arrondi est volontairement
// figé ensemble: low et medium arrondissent vers le bas, high vers le haut,
// ce qui garantit low <= medium <= high sur un même jeu d'échantillons.
impl PriorityLevel {
    pub fn multiplier(self) -> f64 {
        match self {
            PriorityLevel::Low => 0.5,
            PriorityLevel::Medium => 1.0,
            PriorityLevel::High => 1.5,
        }
    }

    pub fn rounds_up(self) -> bool {
        matches!(self, PriorityLevel::High)
    }

    /// Frais de repli (micro-lamports par CU) quand les échantillons sont
    /// indisponibles. On répond toujours quelque chose plutôt que d'échouer.
    pub fn fallback_fee(self) -> u64 {
        match self {
            PriorityLevel::Low => 1_000,
            PriorityLevel::Medium => 10_000,
            PriorityLevel::High => 100_000,
        }
    }
}

/// Estime le frais de priorité à enchérir, en micro-lamports par compute unit,
/// à partir des échantillons récents du marché de frais.
///
/// Les marchés de frais Solana sont locaux aux comptes verrouillés en écriture:
/// on restreint donc la requête d'échantillons à l'union des comptes writable
/// et des programmes touchés par les instructions.
#[derive(Clone)]
pub struct FeeEstimator {
    rpc_client: Arc<ResilientRpcClient>,
}

impl FeeEstimator {
    pub fn new(rpc_client: Arc<ResilientRpcClient>) -> Self {
        Self { rpc_client }
    }

    pub async fn estimate(
        &self,
        instructions: &[Instruction],
        level: PriorityLevel,
        cap_microlamports: Option<u64>,
    ) -> u64 {
        let accounts = fee_scope_accounts(instructions);

        match self.rpc_client.get_recent_prioritization_fees(&accounts).await {
            Ok(fees) => {
                let samples: Vec<f64> =
                    fees.iter().map(|f| f.prioritization_fee as f64).collect();
                let fee = estimate_from_samples(samples, level, cap_microlamports);
                debug!(?level, fee, nb_comptes = accounts.len(), "Frais de priorité estimés.");
                fee
            }
            Err(e) => {
                // L'échec de la récupération ne doit jamais faire échouer l'appelant.
                metrics::FEE_FALLBACKS.inc();
                let fee = clamp_to_cap(level.fallback_fee(), cap_microlamports);
                warn!(error = %e, ?level, fee, "Échantillons de frais indisponibles, repli sur la valeur fixe.");
                fee
            }
        }
    }
}

/// Union des comptes writable et des identités de programme touchés par les instructions.
pub fn fee_scope_accounts(instructions: &[Instruction]) -> Vec<Pubkey> {
    let mut accounts: HashSet<Pubkey> = HashSet::new();
    for instruction in instructions {
        accounts.insert(instruction.program_id);
        for meta in &instruction.accounts {
            if meta.is_writable {
                accounts.insert(meta.pubkey);
            }
        }
    }
    accounts.into_iter().collect()
}

/// Filtre (ni NaN/infini, ni <= 0) puis trie les échantillons par ordre croissant.
/// Idempotent: l'appliquer deux fois produit la même séquence.
pub fn filter_and_sort_samples(mut samples: Vec<f64>) -> Vec<f64> {
    samples.retain(|fee| fee.is_finite() && *fee > 0.0);
    // Plus de NaN après le filtre: la comparaison partielle est totale.
    samples.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    samples
}

/// Médiane d'une liste triée, arrondie vers le bas.
/// Liste vide -> 0; un seul élément -> cet élément; taille paire -> moyenne
/// des deux éléments centraux.
pub fn median_floor(sorted: &[f64]) -> u64 {
    let n = sorted.len();
    if n == 0 {
        return 0;
    }
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    median.floor() as u64
}

/// Le cœur pur de l'estimation: filtre, trie, médiane, multiplicateur de
/// niveau, arrondi du niveau, plafond.
pub fn estimate_from_samples(
    samples: Vec<f64>,
    level: PriorityLevel,
    cap_microlamports: Option<u64>,
) -> u64 {
    let sorted = filter_and_sort_samples(samples);
    let median = median_floor(&sorted) as f64;
    let scaled = median * level.multiplier();
    let fee = if level.rounds_up() {
        scaled.ceil() as u64
    } else {
        scaled.floor() as u64
    };
    clamp_to_cap(fee, cap_microlamports)
}

fn clamp_to_cap(fee: u64, cap_microlamports: Option<u64>) -> u64 {
    match cap_microlamports {
        Some(cap) => fee.min(cap),
        None => fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::AccountMeta;

    #[test]
    fn test_filtre_et_tri_idempotents() {
        let samples = vec![5.0, f64::NAN, -3.0, 0.0, 2.0, f64::INFINITY, 8.0];
        let once = filter_and_sort_samples(samples);
        assert_eq!(once, vec![2.0, 5.0, 8.0]);
        let twice = filter_and_sort_samples(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_mediane_impaire_et_paire() {
        assert_eq!(median_floor(&[1.0, 3.0, 9.0]), 3);
        assert_eq!(median_floor(&[1.0, 3.0, 4.0, 9.0]), 3); // (3+4)/2 = 3.5 -> 3
        assert_eq!(median_floor(&[7.0]), 7);
        assert_eq!(median_floor(&[]), 0);
    }

    #[test]
    fn test_monotonie_des_niveaux() {
        let samples = vec![120.0, 30.0, 990.0, 45.0, 60.0];
        let low = estimate_from_samples(samples.clone(), PriorityLevel::Low, None);
        let medium = estimate_from_samples(samples.clone(), PriorityLevel::Medium, None);
        let high = estimate_from_samples(samples, PriorityLevel::High, None);
        assert!(low <= medium, "{low} > {medium}");
        assert!(medium <= high, "{medium} > {high}");
    }

    #[test]
    fn test_plafond_toujours_respecte() {
        let samples = vec![1_000_000.0, 2_000_000.0, 3_000_000.0];
        for level in [PriorityLevel::Low, PriorityLevel::Medium, PriorityLevel::High] {
            assert!(estimate_from_samples(samples.clone(), level, Some(500)) <= 500);
        }
    }

    #[test]
    fn test_echantillons_vides_donnent_zero() {
        assert_eq!(
            estimate_from_samples(vec![], PriorityLevel::Medium, Some(10_000)),
            0
        );
        assert_eq!(
            estimate_from_samples(vec![f64::NAN, -1.0], PriorityLevel::High, None),
            0
        );
    }

    #[test]
    fn test_echantillon_unique_est_la_mediane() {
        assert_eq!(
            estimate_from_samples(vec![42.0], PriorityLevel::Medium, None),
            42
        );
    }

    #[test]
    fn test_arrondi_vers_le_haut_pour_high() {
        // médiane 3, high = 3 * 1.5 = 4.5 -> 5 (ceil); medium -> 3 (floor).
        let samples = vec![3.0];
        assert_eq!(estimate_from_samples(samples.clone(), PriorityLevel::High, None), 5);
        assert_eq!(estimate_from_samples(samples, PriorityLevel::Medium, None), 3);
    }

    #[test]
    fn test_comptes_du_marche_de_frais() {
        let program = Pubkey::new_unique();
        let writable = Pubkey::new_unique();
        let readonly = Pubkey::new_unique();
        let ix = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::new(writable, false),
                AccountMeta::new_readonly(readonly, false),
            ],
            data: vec![],
        };
        let accounts = fee_scope_accounts(&[ix]);
        assert!(accounts.contains(&program));
        assert!(accounts.contains(&writable));
        assert!(!accounts.contains(&readonly));
    }

    #[tokio::test]
    async fn test_repli_quand_le_rpc_est_mort() {
        let rpc = Arc::new(ResilientRpcClient::new("http://127.0.0.1:1".to_string(), 0, 1));
        let estimator = FeeEstimator::new(rpc);
        let payer = Pubkey::new_unique();
        let ix = solana_sdk::system_instruction::transfer(&payer, &Pubkey::new_unique(), 1);

        let fee = estimator
            .estimate(&[ix.clone()], PriorityLevel::Medium, None)
            .await;
        assert_eq!(fee, PriorityLevel::Medium.fallback_fee());

        // Le repli reste plafonné.
        let capped = estimator.estimate(&[ix], PriorityLevel::High, Some(7)).await;
        assert_eq!(capped, 7);
    }
}
