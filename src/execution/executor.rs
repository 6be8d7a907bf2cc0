// DANS : src/execution/executor.rs

use futures::future::join_all;
use solana_client::rpc_config::RpcSimulateTransactionConfig;
use solana_sdk::signature::Signature;
use solana_transaction_status::UiTransactionEncoding;
use std::sync::Arc;
use tracing::{debug, info};

use crate::execution::coordinator::{flatten, ExecutionCoordinator};
use crate::execution::cu_manager;
use crate::execution::errors::{ErrorTranslator, ExecuteError};
use crate::execution::fee_manager::FeeEstimator;
use crate::execution::transaction_builder::{
    apply_partial_signers, compile_transaction, TransactionSigner,
};
use crate::execution::types::{
    ExecutionOptions, ExecutionOutcome, SimulationOutcome, TransactionRequest,
};
use crate::rpc::ResilientRpcClient;

/// Le point d'entrée public du pipeline d'exécution.
///
/// `execute` prend une demande et rend la signature confirmée ou une erreur
/// classifiée; `execute_batch` déroule le même pipeline sur N demandes
/// indépendantes, avec isolation des échecs: l'échec terminal d'une transaction
/// n'affecte jamais les autres et n'apparaît que dans son `ExecutionOutcome`.
pub struct TransactionExecutor {
    rpc_client: Arc<ResilientRpcClient>,
    signer: Arc<dyn TransactionSigner>,
    fee_estimator: FeeEstimator,
    translator: ErrorTranslator,
}

impl TransactionExecutor {
    pub fn new(rpc_client: Arc<ResilientRpcClient>, signer: Arc<dyn TransactionSigner>) -> Self {
        let fee_estimator = FeeEstimator::new(rpc_client.clone());
        Self {
            rpc_client,
            signer,
            fee_estimator,
            translator: ErrorTranslator::default(),
        }
    }

    /// Installe une table d'erreurs spécifique aux programmes appelés.
    pub fn with_translator(mut self, translator: ErrorTranslator) -> Self {
        self.translator = translator;
        self
    }

    // --- SIMULATION ---

    /// Simule une demande et rapporte le résultat brut (unités consommées,
    /// erreur d'exécution éventuelle, logs). Ne lève que les erreurs de
    /// transport; une erreur d'exécution simulée est rapportée dans l'issue.
    pub async fn simulate(
        &self,
        request: &TransactionRequest,
        options: &ExecutionOptions,
    ) -> Result<SimulationOutcome, ExecuteError> {
        let mut outcomes = self
            .simulate_all(std::slice::from_ref(request), options, options.verify_signatures_on_simulate)
            .await?;
        Ok(outcomes.remove(0))
    }

    /// Simule un lot de demandes, en parallèle.
    pub async fn simulate_batch(
        &self,
        requests: &[TransactionRequest],
        options: &ExecutionOptions,
    ) -> Result<Vec<SimulationOutcome>, ExecuteError> {
        if requests.is_empty() {
            return Err(ExecuteError::Config("le lot de simulation est vide".to_string()));
        }
        self.simulate_all(requests, options, options.verify_signatures_on_simulate)
            .await
    }

    /// Chemin de simulation commun: une fenêtre de fraîcheur partagée, assemblage
    /// par le même chemin que l'envoi réel, signature si la vérification est
    /// demandée, puis simulations en parallèle.
    async fn simulate_all(
        &self,
        requests: &[TransactionRequest],
        options: &ExecutionOptions,
        verify_signatures: bool,
    ) -> Result<Vec<SimulationOutcome>, ExecuteError> {
        let window = self
            .rpc_client
            .get_freshness_window(options.commitment)
            .await?;

        let mut transactions = Vec::with_capacity(requests.len());
        for request in requests {
            let mut transaction = compile_transaction(request, &window)?;
            apply_partial_signers(&mut transaction, &request.partial_signers)?;
            transactions.push(transaction);
        }
        if verify_signatures {
            transactions = self.signer.sign_all(transactions).await?;
        }

        // `sigVerify` et `replaceRecentBlockhash` sont mutuellement exclusifs côté RPC.
        let config = RpcSimulateTransactionConfig {
            sig_verify: verify_signatures,
            replace_recent_blockhash: !verify_signatures,
            commitment: Some(options.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            ..Default::default()
        };

        let responses = join_all(transactions.iter().map(|transaction| {
            self.rpc_client
                .simulate_transaction_with_config(transaction, config.clone())
        }))
        .await;

        let mut outcomes = Vec::with_capacity(responses.len());
        for response in responses {
            outcomes.push(SimulationOutcome::from(response?.value));
        }
        Ok(outcomes)
    }

    // --- EXÉCUTION ---

    /// Exécute une demande: simulation (dimensionnement du budget de calcul),
    /// injection des instructions de budget, assemblage, signature, puis course
    /// envoi/confirmation jusqu'à un état terminal.
    pub async fn execute(
        &self,
        mut request: TransactionRequest,
        options: &ExecutionOptions,
    ) -> Result<Signature, ExecuteError> {
        if options.enable_priority_fee {
            let outcome = self.simulate(&request, options).await?;
            if let Some(error) = &outcome.error {
                // Transaction structurellement invalide: on ne ré-essaie pas.
                return Err(self.translator.classify_simulation(error));
            }
            let cu_limit = cu_manager::padded_cu_limit(outcome.units_consumed, options.cu_margin_percent);
            let price = self.priority_price(&request, cu_limit, options).await;
            cu_manager::apply_compute_budget(&mut request, cu_limit, price);
            debug!(cu_limit, price, "Budget de calcul injecté.");
        }

        let window = self
            .rpc_client
            .get_freshness_window(options.commitment)
            .await?;
        let mut transaction = compile_transaction(&request, &window)?;
        apply_partial_signers(&mut transaction, &request.partial_signers)?;
        let transaction = self.signer.sign(transaction).await?;

        let coordinator = ExecutionCoordinator::new(self.rpc_client.clone(), self.translator.clone());
        coordinator.run(transaction, window, options.clone()).await
    }

    /// Exécute un lot de demandes indépendantes partageant une même politique
    /// de frais. Le lot entier est avorté AVANT toute diffusion si une seule
    /// simulation échoue: on ne diffuse jamais un lot partiellement valide.
    pub async fn execute_batch(
        &self,
        mut requests: Vec<TransactionRequest>,
        options: &ExecutionOptions,
    ) -> Result<Vec<ExecutionOutcome>, ExecuteError> {
        if requests.is_empty() {
            return Err(ExecuteError::Config("le lot d'exécution est vide".to_string()));
        }

        // (a) Simulation vérifiée de tout le lot (les signataires diffèrent par
        // demande), puis injection du budget propre à chaque demande.
        if options.enable_priority_fee {
            let outcomes = self.simulate_all(&requests, options, true).await?;

            let failures = collect_simulation_failures(&outcomes, &self.translator);
            if !failures.is_empty() {
                return Err(ExecuteError::BatchSimulation(failures));
            }

            let cu_limits: Vec<u64> = outcomes
                .iter()
                .map(|outcome| {
                    cu_manager::padded_cu_limit(outcome.units_consumed, options.cu_margin_percent)
                })
                .collect();
            let prices = join_all(
                requests
                    .iter()
                    .zip(&cu_limits)
                    .map(|(request, cu_limit)| self.priority_price(request, *cu_limit, options)),
            )
            .await;
            for ((request, cu_limit), price) in
                requests.iter_mut().zip(cu_limits).zip(prices)
            {
                cu_manager::apply_compute_budget(request, cu_limit, price);
            }
        }

        // (b) Une seule fenêtre de fraîcheur pour tout le lot.
        let window = self
            .rpc_client
            .get_freshness_window(options.commitment)
            .await?;

        // (c) Assemblage, signataires partiels, puis UN appel de signature
        // pour tout le lot (flux d'approbation groupée des wallets).
        let mut transactions = Vec::with_capacity(requests.len());
        for request in &requests {
            let mut transaction = compile_transaction(request, &window)?;
            apply_partial_signers(&mut transaction, &request.partial_signers)?;
            transactions.push(transaction);
        }
        let transactions = self.signer.sign_all(transactions).await?;
        if transactions.len() != requests.len() {
            return Err(ExecuteError::Signing(
                "le Signer n'a pas rendu le même nombre de transactions que reçu".to_string(),
            ));
        }

        // (d)(e) Un coordinateur par transaction, tous en parallèle. Chacun
        // termine de lui-même; l'appel ne rend la main que quand tous ont fini.
        info!(nb_transactions = transactions.len(), "Lancement du lot.");
        let handles: Vec<_> = transactions
            .iter()
            .map(|transaction| {
                let coordinator =
                    ExecutionCoordinator::new(self.rpc_client.clone(), self.translator.clone());
                let transaction = transaction.clone();
                let options = options.clone();
                tokio::spawn(async move { coordinator.run(transaction, window, options).await })
            })
            .collect();
        let results: Vec<Result<Signature, ExecuteError>> =
            join_all(handles).await.into_iter().map(flatten).collect();

        // (f) Issues alignées 1:1 sur l'ordre d'entrée.
        let outcomes = pair_outcomes(requests, transactions, results);

        let fulfilled = outcomes.iter().filter(|o| o.is_fulfilled()).count();
        info!(fulfilled, total = outcomes.len(), "Lot terminé.");
        Ok(outcomes)
    }

    /// Prix par compute unit à déclarer: frais exact de l'appelant converti,
    /// sinon estimation de marché plafonnée par le budget de l'appelant.
    async fn priority_price(
        &self,
        request: &TransactionRequest,
        cu_limit: u64,
        options: &ExecutionOptions,
    ) -> u64 {
        if let Some(exact) = options.exact_priority_fee_lamports {
            return cu_manager::price_from_total_fee(exact, cu_limit);
        }
        let cap = options
            .max_priority_fee_lamports
            .map(|lamports| cu_manager::price_from_total_fee(lamports, cu_limit));
        self.fee_estimator
            .estimate(&request.instructions, options.priority_level, cap)
            .await
    }
}

/// Collecte les échecs de simulation d'un lot, classifiés et indexés par
/// position de la demande. Un lot ne part que si cette liste est vide.
fn collect_simulation_failures(
    outcomes: &[SimulationOutcome],
    translator: &ErrorTranslator,
) -> Vec<(usize, String)> {
    outcomes
        .iter()
        .enumerate()
        .filter_map(|(index, outcome)| {
            outcome
                .error
                .as_ref()
                .map(|error| (index, translator.classify_simulation(error).to_string()))
        })
        .collect()
}

/// Rattache chaque résultat à sa demande d'origine et à sa transaction
/// compilée, en préservant l'ordre d'entrée de l'appelant.
fn pair_outcomes(
    requests: Vec<TransactionRequest>,
    transactions: Vec<solana_sdk::transaction::VersionedTransaction>,
    results: Vec<Result<Signature, ExecuteError>>,
) -> Vec<ExecutionOutcome> {
    requests
        .into_iter()
        .zip(transactions)
        .zip(results)
        .map(|((request, transaction), result)| ExecutionOutcome {
            request,
            transaction,
            result,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::transaction_builder::LocalSigner;
    use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer, system_instruction};

    fn dead_executor(payer: Arc<Keypair>) -> TransactionExecutor {
        let rpc = Arc::new(ResilientRpcClient::new("http://127.0.0.1:1".to_string(), 0, 1));
        TransactionExecutor::new(rpc, Arc::new(LocalSigner::new(vec![payer])))
    }

    fn transfer_request(payer: &Keypair) -> TransactionRequest {
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        TransactionRequest::new(vec![ix], payer.pubkey()).unwrap()
    }

    #[tokio::test]
    async fn test_lot_vide_refuse_avant_tout_appel_reseau() {
        let payer = Arc::new(Keypair::new());
        let executor = dead_executor(payer);
        let result = executor
            .execute_batch(vec![], &ExecutionOptions::default())
            .await;
        assert!(matches!(result, Err(ExecuteError::Config(_))));
    }

    #[tokio::test]
    async fn test_simulation_lot_vide_refusee() {
        let payer = Arc::new(Keypair::new());
        let executor = dead_executor(payer);
        let result = executor
            .simulate_batch(&[], &ExecutionOptions::default())
            .await;
        assert!(matches!(result, Err(ExecuteError::Config(_))));
    }

    #[tokio::test]
    async fn test_endpoint_mort_remonte_une_erreur_rpc() {
        let payer = Arc::new(Keypair::new());
        let request = transfer_request(&payer);
        let executor = dead_executor(payer);

        // La toute première étape (fenêtre de fraîcheur pour la simulation)
        // échoue: l'appelant reçoit une erreur RPC classifiée, jamais un panic.
        let result = executor.execute(request, &ExecutionOptions::default()).await;
        assert!(matches!(result, Err(ExecuteError::Rpc(_))));
    }

    #[test]
    fn test_agregation_des_echecs_de_simulation() {
        let translator = ErrorTranslator::default();
        let outcomes = vec![
            SimulationOutcome {
                units_consumed: Some(1_200),
                ..Default::default()
            },
            SimulationOutcome {
                error: Some("custom program error: 0x1".to_string()),
                ..Default::default()
            },
            SimulationOutcome {
                units_consumed: Some(800),
                ..Default::default()
            },
            SimulationOutcome {
                error: Some("InstructionError(0, InvalidArgument)".to_string()),
                ..Default::default()
            },
        ];

        // Seules les positions en échec apparaissent, dans l'ordre du lot,
        // avec leur erreur déjà classifiée.
        let failures = collect_simulation_failures(&outcomes, &translator);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, 1);
        assert!(failures[0].1.contains("fonds insuffisants"), "{}", failures[0].1);
        assert_eq!(failures[1].0, 3);
        assert!(failures[1].1.contains("simulation"), "{}", failures[1].1);

        // Lot entièrement valide: rien à signaler, la diffusion peut partir.
        let clean = vec![SimulationOutcome::default(); 3];
        assert!(collect_simulation_failures(&clean, &translator).is_empty());
    }

    #[test]
    fn test_issues_alignees_sur_l_ordre_d_entree() {
        use crate::execution::transaction_builder::compile_transaction;
        use crate::execution::types::FreshnessWindow;
        use solana_sdk::{hash::Hash, signature::Signature};

        let window = FreshnessWindow {
            blockhash: Hash::new_unique(),
            last_valid_block_height: 1_000,
        };
        let payers: Vec<Keypair> = (0..3).map(|_| Keypair::new()).collect();
        let requests: Vec<TransactionRequest> =
            payers.iter().map(transfer_request).collect();
        let expected_payers: Vec<Pubkey> = requests.iter().map(|r| r.fee_payer).collect();
        let transactions: Vec<_> = requests
            .iter()
            .map(|request| compile_transaction(request, &window).unwrap())
            .collect();

        // Un mélange succès/échec: l'échec du milieu ne décale rien.
        let confirmed_a = Signature::new_unique();
        let confirmed_b = Signature::new_unique();
        let results = vec![
            Ok(confirmed_a),
            Err(ExecuteError::ConfirmationTimeout(60_000)),
            Ok(confirmed_b),
        ];

        let outcomes = pair_outcomes(requests, transactions, results);
        assert_eq!(outcomes.len(), 3);
        for (outcome, expected) in outcomes.iter().zip(&expected_payers) {
            assert_eq!(outcome.request.fee_payer, *expected);
            assert_eq!(
                outcome.transaction.message.static_account_keys()[0],
                *expected
            );
        }
        assert!(outcomes[0].is_fulfilled());
        assert!(!outcomes[1].is_fulfilled());
        assert!(outcomes[2].is_fulfilled());
        assert_eq!(outcomes[0].signature(), Some(&confirmed_a));
        assert!(outcomes[1].signature().is_none());
        assert_eq!(outcomes[2].signature(), Some(&confirmed_b));
    }

    #[tokio::test]
    async fn test_frais_exact_court_circuite_l_estimation() {
        let payer = Arc::new(Keypair::new());
        let request = transfer_request(&payer);
        let executor = dead_executor(payer);

        let options = ExecutionOptions {
            exact_priority_fee_lamports: Some(105_000),
            ..Default::default()
        };
        // Aucun appel réseau: le RPC mort n'est pas touché par ce chemin.
        let price = executor.priority_price(&request, 200_000, &options).await;
        assert_eq!(price, 500_000);
    }
}
